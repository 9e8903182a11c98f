use crate::card::{restore_card, save_card, CardOutcome, Operation, Report};
use crate::decode::RestoreOptions;
use crate::{Result, StateError};
use ctl_transport::{CardProvider, TransportError};
use state_tree::Node;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const DEFAULT_STATE_FILE: &str = "/var/lib/alsa/asound.state";

fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Load a state document; `-` reads standard input.
pub fn load_document(path: impl AsRef<Path>) -> Result<Node> {
    let path = path.as_ref();
    if is_stdio(path) {
        return Ok(Node::load(io::stdin().lock())?);
    }
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    Ok(Node::parse(&text)?)
}

/// Like [`load_document`], but a missing file yields an empty document.
fn load_existing(path: &Path) -> Result<Node> {
    if is_stdio(path) {
        return Ok(Node::top());
    }
    match fs::read_to_string(path) {
        Ok(text) => Ok(Node::parse(&text)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no previous state file");
            Ok(Node::top())
        }
        Err(e) => Err(io_error(path)(e)),
    }
}

/// Write a state document; `-` writes standard output.
///
/// Files are written to `<path>.new` first and renamed into place.
pub fn write_document(path: impl AsRef<Path>, doc: &Node) -> Result<()> {
    let path = path.as_ref();
    if is_stdio(path) {
        let mut out = io::stdout().lock();
        doc.save(&mut out)?;
        return Ok(());
    }
    let mut tmp = PathBuf::from(path);
    tmp.as_mut_os_string().push(".new");
    let mut file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
    file.write_all(doc.to_text().as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(io_error(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_error(path))?;
    Ok(())
}

/// One named card, or every installed card in ascending index order.
pub fn select_cards<P: CardProvider + ?Sized>(
    provider: &P,
    card: Option<&str>,
) -> Result<Vec<u32>> {
    match card {
        Some(name) => match provider.card_index(name) {
            Ok(index) => Ok(vec![index]),
            Err(TransportError::CardNotFound(_)) => {
                Err(StateError::CardNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        },
        None => {
            let mask = provider.installed()?;
            if mask.is_empty() {
                return Err(StateError::CardNotFound("no soundcards found".into()));
            }
            Ok(mask.iter().collect())
        }
    }
}

/// Snapshot the selected cards into the document at `path`.
///
/// Content of cards not selected is preserved. A card that fails keeps its
/// previous snapshot; the document is written regardless.
pub fn save_state<P: CardProvider + ?Sized>(
    provider: &mut P,
    path: impl AsRef<Path>,
    card: Option<&str>,
) -> Result<Report> {
    let path = path.as_ref();
    let cards = select_cards(provider, card)?;
    let mut doc = load_existing(path)?;
    let mut report = Report::new(Operation::Store);
    for index in cards {
        let outcome = match provider.open(index) {
            Ok(mut dev) => match dev.card_info() {
                Ok(info) => save_card(&mut *dev, &info, &mut doc)
                    .unwrap_or_else(|e| failed(index, &info.id, e)),
                Err(e) => failed(index, &format!("card{index}"), e.into()),
            },
            Err(e) => failed(index, &format!("card{index}"), e.into()),
        };
        report.cards.push(outcome);
    }
    write_document(path, &doc)?;
    info!(path = %path.display(), cards = report.cards.len(), "state stored");
    Ok(report)
}

/// Write the document's state back to the selected cards.
pub fn restore_state<P: CardProvider + ?Sized>(
    provider: &mut P,
    path: impl AsRef<Path>,
    card: Option<&str>,
    opts: &RestoreOptions,
) -> Result<Report> {
    let path = path.as_ref();
    let cards = select_cards(provider, card)?;
    let doc = load_document(path)?;
    let mut report = Report::new(Operation::Restore);
    for index in cards {
        let outcome = match provider.open(index) {
            Ok(mut dev) => match dev.card_info() {
                Ok(info) => restore_card(&mut *dev, &info, &doc, opts)
                    .unwrap_or_else(|e| failed(index, &info.id, e)),
                Err(e) => failed(index, &format!("card{index}"), e.into()),
            },
            Err(e) => failed(index, &format!("card{index}"), e.into()),
        };
        report.cards.push(outcome);
    }
    Ok(report)
}

fn failed(index: u32, id: &str, err: StateError) -> CardOutcome {
    error!(card = id, "{err}");
    CardOutcome::failed(index, id, &err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardStatus;
    use ctl_transport::{ControlId, ControlInfo, ControlValue, Iface, MockCard, MockSystem};

    fn system() -> anyhow::Result<MockSystem> {
        let mut system = MockSystem::new();
        for (index, id) in [(0, "PCH"), (1, "USB")] {
            let mut card = MockCard::new(index, id, id);
            card.add_control(
                ControlInfo::boolean(ControlId::new(Iface::Mixer, "Mute"), 1),
                ControlValue::Boolean(vec![false]),
            )?;
            card.add_control(
                ControlInfo::integer(ControlId::new(Iface::Mixer, "Volume"), 2, 0, 31, 1),
                ControlValue::Integer(vec![10, 20]),
            )?;
            system.insert(card);
        }
        Ok(system)
    }

    fn set_volume(system: &mut MockSystem, index: u32, v: Vec<i64>) {
        if let Some(c) = system.card_mut(index).and_then(|card| card.control_mut(2)) {
            c.value = ControlValue::Integer(v);
        }
    }

    fn volume(system: &MockSystem, index: u32) -> Option<ControlValue> {
        system
            .card(index)
            .and_then(|card| card.value_of("Volume"))
            .cloned()
    }

    #[test]
    fn store_then_restore_all_cards() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("asound.state");
        let mut system = system()?;
        set_volume(&mut system, 1, vec![3, 4]);

        let report = save_state(&mut system, &path, None)?;
        assert!(report.is_success());
        assert_eq!(report.cards.len(), 2);
        assert!(!dir.path().join("asound.state.new").exists());

        set_volume(&mut system, 0, vec![0, 0]);
        set_volume(&mut system, 1, vec![0, 0]);
        let report = restore_state(&mut system, &path, None, &RestoreOptions::default())?;
        assert!(report.is_success());
        assert_eq!(volume(&system, 0), Some(ControlValue::Integer(vec![10, 20])));
        assert_eq!(volume(&system, 1), Some(ControlValue::Integer(vec![3, 4])));
        Ok(())
    }

    #[test]
    fn store_one_card_preserves_the_other() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("asound.state");
        let mut system = system()?;
        save_state(&mut system, &path, None)?;
        let before = load_document(&path)?;

        set_volume(&mut system, 0, vec![1, 1]);
        set_volume(&mut system, 1, vec![2, 2]);
        save_state(&mut system, &path, Some("PCH"))?;
        let after = load_document(&path)?;

        let usb = |doc: &Node| doc.search_path(&["state", "USB"]).map(Node::to_text);
        assert_eq!(usb(&before), usb(&after));
        assert_eq!(
            after
                .search_path(&["state", "PCH", "control", "2", "value", "0"])
                .and_then(Node::as_integer),
            Some(1)
        );
        Ok(())
    }

    #[test]
    fn failed_card_does_not_stop_the_others() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("asound.state");
        let mut system = system()?;
        if let Some(card) = system.card_mut(0) {
            card.break_control(1);
        }
        let report = save_state(&mut system, &path, None)?;
        assert!(!report.is_success());
        assert!(matches!(report.cards[0].status, CardStatus::Failed(_)));
        assert_eq!(report.cards[1].status, CardStatus::Ok);
        let doc = load_document(&path)?;
        assert!(doc.search_path(&["state", "USB", "control"]).is_some());
        assert!(doc.search_path(&["state", "PCH"]).is_none());
        Ok(())
    }

    #[test]
    fn card_selection() -> anyhow::Result<()> {
        let system = system()?;
        assert_eq!(select_cards(&system, None)?, vec![0, 1]);
        assert_eq!(select_cards(&system, Some("USB"))?, vec![1]);
        assert_eq!(select_cards(&system, Some("0"))?, vec![0]);
        assert!(matches!(
            select_cards(&system, Some("HDMI")),
            Err(StateError::CardNotFound(_))
        ));
        assert!(matches!(
            select_cards(&MockSystem::new(), None),
            Err(StateError::CardNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn restore_requires_the_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut system = system()?;
        let err = restore_state(
            &mut system,
            dir.path().join("missing.state"),
            None,
            &RestoreOptions::default(),
        )
        .err();
        assert!(matches!(err, Some(StateError::Io { .. })));
        Ok(())
    }

    #[test]
    fn unparsable_file_is_not_overwritten() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("asound.state");
        fs::write(&path, "state.PCH { control {")?;
        let mut system = system()?;
        assert!(matches!(
            save_state(&mut system, &path, None),
            Err(StateError::Tree(_))
        ));
        assert_eq!(fs::read_to_string(&path)?, "state.PCH { control {");
        Ok(())
    }

    #[test]
    fn dry_run_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("asound.state");
        fs::write(
            &path,
            "state.USB.control.2 { iface mixer name Volume value { 0 30 1 31 } }",
        )?;
        let mut system = system()?;
        let opts = RestoreOptions {
            dry_run: true,
            ..RestoreOptions::default()
        };
        let report = restore_state(&mut system, &path, Some("USB"), &opts)?;
        assert!(report.is_success());
        assert_eq!(report.cards[0].controls, 1);
        assert!(report.cards[0].count_mismatch);
        assert_eq!(volume(&system, 1), Some(ControlValue::Integer(vec![10, 20])));
        Ok(())
    }
}
