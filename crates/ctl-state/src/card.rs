use crate::decode::{decode_control, RestoreOptions, RestoreStatus};
use crate::encode::encode_control;
use crate::{Result, StateError};
use ctl_transport::{CardInfo, ControlDevice, ElemAddr};
use serde::Serialize;
use state_tree::Node;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Ok,
    /// Nothing stored for this card; nothing was touched.
    Skipped,
    Failed(String),
}

/// Result of storing or restoring one card.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CardOutcome {
    pub index: u32,
    pub id: String,
    pub status: CardStatus,
    /// Controls stored, or restored (written or validated).
    pub controls: usize,
    /// Controls left alone: unreadable on store; read-only, inactive or
    /// failed under force on restore.
    pub skipped: usize,
    pub mismatches: usize,
    /// The document and the card disagree on the number of controls.
    pub count_mismatch: bool,
}

impl CardOutcome {
    pub fn new(card: &CardInfo) -> Self {
        Self {
            index: card.index,
            id: card.id.clone(),
            status: CardStatus::Ok,
            controls: 0,
            skipped: 0,
            mismatches: 0,
            count_mismatch: false,
        }
    }

    pub fn failed(index: u32, id: impl Into<String>, err: &StateError) -> Self {
        Self {
            index,
            id: id.into(),
            status: CardStatus::Failed(err.to_string()),
            controls: 0,
            skipped: 0,
            mismatches: 0,
            count_mismatch: false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CardStatus::Failed(_))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Store,
    Restore,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Report {
    pub operation: Operation,
    pub cards: Vec<CardOutcome>,
}

impl Report {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            cards: Vec::new(),
        }
    }

    /// True unless some card failed. Skipped cards do not count as failures.
    pub fn is_success(&self) -> bool {
        !self.cards.iter().any(CardOutcome::is_failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CardOutcome> {
        self.cards.iter().filter(|c| c.is_failed())
    }
}

/// Replace `state.<card id>.control` in `doc` with a fresh snapshot.
///
/// The old subtree survives untouched if any control fails to encode.
pub fn save_card<D: ControlDevice + ?Sized>(
    dev: &mut D,
    card: &CardInfo,
    doc: &mut Node,
) -> Result<CardOutcome> {
    let mut outcome = CardOutcome::new(card);
    let mut control = Node::compound("control");
    for id in dev.elem_list()? {
        if encode_control(dev, &id, &mut control)? {
            outcome.controls += 1;
        } else {
            outcome.skipped += 1;
        }
    }
    doc.ensure_compound("state")?
        .ensure_compound(&card.id)?
        .replace(control)?;
    info!(card = %card.id, controls = outcome.controls, "stored");
    Ok(outcome)
}

/// The stored `control` subtree of a card, if any.
pub fn find_card_state<'a>(doc: &'a Node, card: &CardInfo, force: bool) -> Option<&'a Node> {
    if let Some(node) = doc.search_path(&["state", card.id.as_str(), "control"]) {
        return Some(node);
    }
    if force {
        let fallback = format!("card{}", card.index);
        if let Some(node) = doc.search_path(&["state", fallback.as_str(), "control"]) {
            warn!(card = %card.id, "using stored state of {fallback}");
            return Some(node);
        }
    }
    None
}

/// Write every stored control of one card back to the device.
///
/// Without force the first failing control aborts the card.
pub fn restore_card<D: ControlDevice + ?Sized>(
    dev: &mut D,
    card: &CardInfo,
    doc: &Node,
    opts: &RestoreOptions,
) -> Result<CardOutcome> {
    let mut outcome = CardOutcome::new(card);
    let Some(control) = find_card_state(doc, card, opts.force) else {
        warn!(card = %card.id, "no state is present for card");
        outcome.status = CardStatus::Skipped;
        return Ok(outcome);
    };
    if !control.is_compound() {
        return Err(StateError::Document(format!(
            "state.{}.control is not a compound",
            card.id
        )));
    }

    for node in control.children() {
        match decode_control(dev, node, opts) {
            Ok(restored) => {
                outcome.mismatches += restored.mismatches.len();
                match restored.status {
                    RestoreStatus::Written | RestoreStatus::Validated => outcome.controls += 1,
                    RestoreStatus::NotWritable | RestoreStatus::Inactive => outcome.skipped += 1,
                }
            }
            Err(e) if opts.force => {
                error!(card = %card.id, "{e}");
                outcome.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    let live = readable_controls(dev)?;
    let stored = control.children().len();
    if live != stored {
        warn!(
            card = %card.id,
            stored,
            live,
            "stored control count differs from the card"
        );
        outcome.count_mismatch = true;
    }
    debug!(card = %card.id, ?outcome, "restore done");
    info!(card = %card.id, controls = outcome.controls, "restored");
    Ok(outcome)
}

fn readable_controls<D: ControlDevice + ?Sized>(dev: &mut D) -> Result<usize> {
    let mut count = 0;
    for id in dev.elem_list()? {
        let info = dev
            .elem_info(&ElemAddr::Numid(id.numid))
            .map_err(StateError::control(id.numid))?;
        if info.is_readable() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_transport::{ControlId, ControlInfo, ControlValue, Iface, MockCard};

    fn card(index: u32, id: &str) -> anyhow::Result<MockCard> {
        let mut card = MockCard::new(index, id, id);
        card.add_control(
            ControlInfo::boolean(ControlId::new(Iface::Mixer, "Mute"), 1),
            ControlValue::Boolean(vec![false]),
        )?;
        card.add_control(
            ControlInfo::integer(ControlId::new(Iface::Mixer, "Volume"), 2, 0, 31, 1),
            ControlValue::Integer(vec![10, 20]),
        )?;
        Ok(card)
    }

    fn store(card: &mut MockCard, doc: &mut Node) -> Result<CardOutcome> {
        let info = card.info().clone();
        save_card(card, &info, doc)
    }

    fn load(card: &mut MockCard, doc: &Node, opts: &RestoreOptions) -> Result<CardOutcome> {
        let info = card.info().clone();
        restore_card(card, &info, doc, opts)
    }

    #[test]
    fn save_leaves_other_cards_untouched() -> anyhow::Result<()> {
        let mut doc = Node::parse(
            "state.USB {\n\tcontrol.7 {\n\t\tname 'Odd  Name'\n\t\tvalue 0x10\n\t}\n}\n",
        )?;
        let before = doc
            .search_path(&["state", "USB"])
            .map(Node::to_text)
            .ok_or_else(|| anyhow::anyhow!("USB"))?;
        let mut pch = card(0, "PCH")?;
        let outcome = store(&mut pch, &mut doc)?;
        assert_eq!(outcome.controls, 2);

        let reparsed = Node::parse(&doc.to_text())?;
        let after = reparsed
            .search_path(&["state", "USB"])
            .map(Node::to_text)
            .ok_or_else(|| anyhow::anyhow!("USB"))?;
        assert_eq!(before, after);
        assert!(reparsed.search_path(&["state", "PCH", "control", "2"]).is_some());
        Ok(())
    }

    #[test]
    fn save_drops_stale_controls() -> anyhow::Result<()> {
        let mut doc = Node::parse("state.PCH.control.99 { name Gone value 1 }")?;
        let mut pch = card(0, "PCH")?;
        store(&mut pch, &mut doc)?;
        assert!(doc.search_path(&["state", "PCH", "control", "99"]).is_none());
        assert!(doc.search_path(&["state", "PCH", "control", "1"]).is_some());
        Ok(())
    }

    #[test]
    fn failed_save_keeps_previous_snapshot() -> anyhow::Result<()> {
        let mut doc = Node::parse("state.PCH.control.99 { name Old value 1 }")?;
        let mut pch = card(0, "PCH")?;
        pch.break_control(2);
        assert!(store(&mut pch, &mut doc).is_err());
        assert!(doc.search_path(&["state", "PCH", "control", "99"]).is_some());
        Ok(())
    }

    #[test]
    fn restore_round_trip() -> anyhow::Result<()> {
        let mut doc = Node::top();
        let mut source = card(0, "PCH")?;
        if let Some(c) = source.control_mut(2) {
            c.value = ControlValue::Integer(vec![30, 1]);
        }
        store(&mut source, &mut doc)?;

        let mut target = card(0, "PCH")?;
        let outcome = load(&mut target, &doc, &RestoreOptions::default())?;
        assert_eq!(outcome.status, CardStatus::Ok);
        assert_eq!(outcome.controls, 2);
        assert!(!outcome.count_mismatch);
        assert_eq!(
            target.value_of("Volume"),
            Some(&ControlValue::Integer(vec![30, 1]))
        );
        Ok(())
    }

    #[test]
    fn missing_card_state_is_skipped() -> anyhow::Result<()> {
        let doc = Node::parse("state.USB.control.1 { name Mute value true }")?;
        let mut pch = card(0, "PCH")?;
        let outcome = load(&mut pch, &doc, &RestoreOptions::default())?;
        assert_eq!(outcome.status, CardStatus::Skipped);
        assert_eq!(pch.value_of("Mute"), Some(&ControlValue::Boolean(vec![false])));
        Ok(())
    }

    #[test]
    fn unknown_control_aborts_unless_forced() -> anyhow::Result<()> {
        let text = "state.PCH.control {
            5 { name Bass value 3 }
            1 { name Mute value true }
        }";
        let doc = Node::parse(text)?;
        let mut pch = card(0, "PCH")?;
        assert!(matches!(
            load(&mut pch, &doc, &RestoreOptions::default()),
            Err(StateError::ControlNotFound { numid: 5, .. })
        ));
        assert_eq!(pch.value_of("Mute"), Some(&ControlValue::Boolean(vec![false])));

        let force = RestoreOptions {
            force: true,
            ..RestoreOptions::default()
        };
        let outcome = load(&mut pch, &doc, &force)?;
        assert_eq!(outcome.controls, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(pch.value_of("Mute"), Some(&ControlValue::Boolean(vec![true])));
        Ok(())
    }

    #[test]
    fn count_mismatch_is_reported() -> anyhow::Result<()> {
        let doc = Node::parse("state.PCH.control.1 { name Mute value true }")?;
        let mut pch = card(0, "PCH")?;
        let outcome = load(&mut pch, &doc, &RestoreOptions::default())?;
        assert_eq!(outcome.status, CardStatus::Ok);
        assert!(outcome.count_mismatch);
        Ok(())
    }

    #[test]
    fn forced_restore_falls_back_to_card_index() -> anyhow::Result<()> {
        let doc = Node::parse("state.card3.control.1 { name Mute value true }")?;
        let mut usb = card(3, "USB")?;
        let outcome = load(&mut usb, &doc, &RestoreOptions::default())?;
        assert_eq!(outcome.status, CardStatus::Skipped);

        let force = RestoreOptions {
            force: true,
            ..RestoreOptions::default()
        };
        let outcome = load(&mut usb, &doc, &force)?;
        assert_eq!(outcome.status, CardStatus::Ok);
        assert_eq!(usb.value_of("Mute"), Some(&ControlValue::Boolean(vec![true])));
        Ok(())
    }

    #[test]
    fn report_success_ignores_skipped_cards() {
        let info = CardInfo {
            index: 0,
            id: "PCH".into(),
            name: "PCH".into(),
        };
        let mut report = Report::new(Operation::Restore);
        let mut skipped = CardOutcome::new(&info);
        skipped.status = CardStatus::Skipped;
        report.cards.push(skipped);
        assert!(report.is_success());
        report.cards.push(CardOutcome::failed(
            1,
            "USB",
            &StateError::CardNotFound("USB".into()),
        ));
        assert!(!report.is_success());
        assert_eq!(report.failed().count(), 1);
    }

    #[test]
    fn report_serializes_status() -> anyhow::Result<()> {
        let mut report = Report::new(Operation::Store);
        report.cards.push(CardOutcome::failed(
            2,
            "HDMI",
            &StateError::data(4, "missing value"),
        ));
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["operation"], "store");
        assert_eq!(
            json["cards"][0]["status"]["failed"],
            "control #4: missing value"
        );
        Ok(())
    }
}
