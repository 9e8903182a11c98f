use crate::{
    Access, CardInfo, CardMask, CardProvider, ControlDevice, ControlId, ControlInfo, ControlValue,
    ElemAddr, ElemType, Iface, Result, TransportError,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One simulated control element.
#[derive(Clone, Debug)]
pub struct MockControl {
    pub info: ControlInfo,
    pub item_names: Vec<String>,
    pub value: ControlValue,
    broken: bool,
}

/// A simple in-process card. Each card instance is independent.
#[derive(Clone, Debug)]
pub struct MockCard {
    info: CardInfo,
    controls: Vec<MockControl>,
    source: Option<PathBuf>,
}

impl MockCard {
    pub fn new(index: u32, id: &str, name: &str) -> Self {
        Self {
            info: CardInfo {
                index,
                id: id.to_string(),
                name: name.to_string(),
            },
            controls: Vec::new(),
            source: None,
        }
    }

    pub fn info(&self) -> &CardInfo {
        &self.info
    }

    /// Add a control; a zero numid in `info.id` is replaced by the next free one.
    pub fn add_control(&mut self, mut info: ControlInfo, value: ControlValue) -> Result<u32> {
        if info.id.numid == 0 {
            info.id.numid = self.next_numid();
        } else if self.position(info.id.numid).is_some() {
            return Err(TransportError::InvalidValue(format!(
                "duplicate numid {}",
                info.id.numid
            )));
        }
        check_shape(&info, &value)?;
        let numid = info.id.numid;
        self.controls.push(MockControl {
            info,
            item_names: Vec::new(),
            value,
            broken: false,
        });
        Ok(numid)
    }

    pub fn add_enumerated(
        &mut self,
        id: ControlId,
        items: &[&str],
        value: Vec<u32>,
    ) -> Result<u32> {
        let info = ControlInfo::enumerated(id, value.len() as u32, items.len() as u32);
        let numid = self.add_control(info, ControlValue::Enumerated(value))?;
        if let Some(pos) = self.position(numid) {
            self.controls[pos].item_names = items.iter().map(|s| s.to_string()).collect();
        }
        Ok(numid)
    }

    pub fn controls(&self) -> &[MockControl] {
        &self.controls
    }

    pub fn control(&self, numid: u32) -> Option<&MockControl> {
        self.controls.iter().find(|c| c.info.id.numid == numid)
    }

    pub fn control_mut(&mut self, numid: u32) -> Option<&mut MockControl> {
        self.controls.iter_mut().find(|c| c.info.id.numid == numid)
    }

    /// Current value of the first control with the given name.
    pub fn value_of(&self, name: &str) -> Option<&ControlValue> {
        self.controls
            .iter()
            .find(|c| c.info.id.name == name)
            .map(|c| &c.value)
    }

    /// Make every read and write of this control fail with an I/O error.
    pub fn break_control(&mut self, numid: u32) {
        if let Some(c) = self.control_mut(numid) {
            c.broken = true;
        }
    }

    /// Move a control to another numid, as a driver reload might.
    pub fn renumber(&mut self, from: u32, to: u32) -> Result<()> {
        if self.position(to).is_some() {
            return Err(TransportError::InvalidValue(format!("numid {to} in use")));
        }
        let c = self
            .control_mut(from)
            .ok_or_else(|| TransportError::ControlNotFound(format!("numid={from}")))?;
        c.info.id.numid = to;
        Ok(())
    }

    fn next_numid(&self) -> u32 {
        self.controls
            .iter()
            .map(|c| c.info.id.numid)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn position(&self, numid: u32) -> Option<usize> {
        self.controls.iter().position(|c| c.info.id.numid == numid)
    }

    fn find(&self, addr: &ElemAddr) -> Result<&MockControl> {
        let found = match addr {
            ElemAddr::Numid(numid) => self.control(*numid),
            ElemAddr::Tuple(id) => self.controls.iter().find(|c| same_tuple(&c.info.id, id)),
        };
        found.ok_or_else(|| TransportError::ControlNotFound(addr.to_string()))
    }

    fn find_id(&mut self, id: &ControlId) -> Result<&mut MockControl> {
        let pos = if id.numid != 0 {
            self.position(id.numid)
        } else {
            self.controls.iter().position(|c| same_tuple(&c.info.id, id))
        };
        match pos {
            Some(pos) => Ok(&mut self.controls[pos]),
            None => Err(TransportError::ControlNotFound(id.to_string())),
        }
    }
}

fn same_tuple(a: &ControlId, b: &ControlId) -> bool {
    a.iface == b.iface
        && a.device == b.device
        && a.subdevice == b.subdevice
        && a.name == b.name
        && a.index == b.index
}

fn check_shape(info: &ControlInfo, value: &ControlValue) -> Result<()> {
    if value.elem_type() != info.elem_type {
        return Err(TransportError::InvalidValue(format!(
            "{} value for {} control",
            value.elem_type(),
            info.elem_type
        )));
    }
    if value.len() != info.count as usize {
        return Err(TransportError::InvalidValue(format!(
            "{} elements, control has {}",
            value.len(),
            info.count
        )));
    }
    Ok(())
}

fn zero_value(info: &ControlInfo) -> ControlValue {
    let n = info.count as usize;
    match info.elem_type {
        ElemType::Boolean => ControlValue::Boolean(vec![false; n]),
        ElemType::Integer => ControlValue::Integer(vec![0; n]),
        ElemType::Integer64 => ControlValue::Integer64(vec![0; n]),
        ElemType::Enumerated => ControlValue::Enumerated(vec![0; n]),
        ElemType::Bytes => ControlValue::Bytes(vec![0; n]),
    }
}

fn check_range(info: &ControlInfo, value: &ControlValue) -> Result<()> {
    match value {
        ControlValue::Integer(vals) | ControlValue::Integer64(vals) => {
            if let Some(v) = vals.iter().find(|v| **v < info.min || **v > info.max) {
                return Err(TransportError::InvalidValue(format!(
                    "{v} outside {} - {}",
                    info.min, info.max
                )));
            }
        }
        ControlValue::Enumerated(vals) => {
            if let Some(v) = vals.iter().find(|v| **v >= info.items) {
                return Err(TransportError::InvalidValue(format!(
                    "item {v} of {}",
                    info.items
                )));
            }
        }
        ControlValue::Boolean(_) | ControlValue::Bytes(_) => {}
    }
    Ok(())
}

impl ControlDevice for MockCard {
    fn card_info(&mut self) -> Result<CardInfo> {
        Ok(self.info.clone())
    }

    fn elem_list(&mut self) -> Result<Vec<ControlId>> {
        Ok(self.controls.iter().map(|c| c.info.id.clone()).collect())
    }

    fn elem_info(&mut self, addr: &ElemAddr) -> Result<ControlInfo> {
        Ok(self.find(addr)?.info.clone())
    }

    fn item_name(&mut self, id: &ControlId, item: u32) -> Result<String> {
        let c = self.find_id(id)?;
        c.item_names
            .get(item as usize)
            .cloned()
            .ok_or_else(|| TransportError::InvalidValue(format!("no item {item} on {id}")))
    }

    fn elem_read(&mut self, id: &ControlId) -> Result<ControlValue> {
        let c = self.find_id(id)?;
        if c.broken {
            return Err(TransportError::Io(format!("read {id} failed")));
        }
        if !c.info.is_readable() {
            return Err(TransportError::PermissionDenied(id.to_string()));
        }
        Ok(c.value.clone())
    }

    fn elem_write(&mut self, id: &ControlId, value: &ControlValue) -> Result<()> {
        let c = self.find_id(id)?;
        if c.broken {
            return Err(TransportError::Io(format!("write {id} failed")));
        }
        if !c.info.is_writable() {
            return Err(TransportError::PermissionDenied(id.to_string()));
        }
        check_shape(&c.info, value)?;
        check_range(&c.info, value)?;
        debug!(control = %id, "mock write");
        c.value = value.clone();
        Ok(())
    }

    fn elem_add(&mut self, info: &ControlInfo, items: &[String]) -> Result<ControlInfo> {
        if self.controls.iter().any(|c| same_tuple(&c.info.id, &info.id)) {
            return Err(TransportError::InvalidValue(format!(
                "{} already exists",
                ElemAddr::Tuple(info.id.clone())
            )));
        }
        if info.count == 0 {
            return Err(TransportError::InvalidValue("control without elements".into()));
        }
        if info.elem_type == ElemType::Enumerated && items.len() != info.items as usize {
            return Err(TransportError::InvalidValue(format!(
                "{} item names for {} items",
                items.len(),
                info.items
            )));
        }
        let mut info = info.clone();
        info.id.numid = 0;
        info.access = Access {
            user: true,
            ..Access::read_write()
        };
        let value = zero_value(&info);
        let numid = self.add_control(info, value)?;
        let pos = self
            .position(numid)
            .ok_or_else(|| TransportError::ControlNotFound(format!("numid={numid}")))?;
        let c = &mut self.controls[pos];
        c.item_names = items.to_vec();
        debug!(control = %c.info.id, "mock user control added");
        Ok(c.info.clone())
    }
}

/// A set of mock cards addressed by index.
#[derive(Clone, Debug, Default)]
pub struct MockSystem {
    cards: BTreeMap<u32, MockCard>,
}

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, card: MockCard) {
        self.cards.insert(card.info.index, card);
    }

    pub fn card(&self, index: u32) -> Option<&MockCard> {
        self.cards.get(&index)
    }

    pub fn card_mut(&mut self, index: u32) -> Option<&mut MockCard> {
        self.cards.get_mut(&index)
    }

    pub fn cards(&self) -> impl Iterator<Item = &MockCard> {
        self.cards.values()
    }

    /// Write every card that was loaded from a file back to that file.
    pub fn save_cards(&self) -> anyhow::Result<()> {
        for card in self.cards.values() {
            if let Some(path) = &card.source {
                save_card_file(card, path)?;
            }
        }
        Ok(())
    }
}

impl CardProvider for MockSystem {
    fn installed(&self) -> Result<CardMask> {
        let mut mask = CardMask::default();
        for index in self.cards.keys() {
            mask.insert(*index);
        }
        Ok(mask)
    }

    fn card_index(&self, name: &str) -> Result<u32> {
        if let Ok(index) = name.trim().parse::<u32>() {
            if self.cards.contains_key(&index) {
                return Ok(index);
            }
        }
        self.cards
            .values()
            .find(|c| c.info.id == name)
            .map(|c| c.info.index)
            .ok_or_else(|| TransportError::CardNotFound(name.to_string()))
    }

    fn open(&mut self, card: u32) -> Result<Box<dyn ControlDevice + '_>> {
        let card = self
            .cards
            .get_mut(&card)
            .ok_or_else(|| TransportError::CardNotFound(format!("hw:{card}")))?;
        Ok(Box::new(card))
    }
}

/// On-disk description of a mock card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MockCardDesc {
    pub index: u32,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub controls: Vec<MockControlDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MockControlDesc {
    pub numid: u32,
    #[serde(default = "default_iface")]
    pub iface: String,
    #[serde(default)]
    pub device: u32,
    #[serde(default)]
    pub subdevice: u32,
    pub name: String,
    #[serde(default)]
    pub index: u32,
    #[serde(rename = "type")]
    pub elem_type: String,
    #[serde(default = "default_access")]
    pub access: Vec<String>,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub step: i64,
    #[serde(default)]
    pub items: Vec<String>,
    /// One entry per element; bytes are given as 0..=255.
    pub value: Vec<i64>,
}

fn default_iface() -> String {
    "mixer".to_string()
}

fn default_access() -> Vec<String> {
    vec!["read".to_string(), "write".to_string()]
}

impl MockCard {
    pub fn from_desc(desc: &MockCardDesc) -> anyhow::Result<Self> {
        let mut card = MockCard::new(desc.index, &desc.id, &desc.name);
        for c in &desc.controls {
            let control = control_from_desc(c)
                .with_context(|| format!("control {} ('{}')", c.numid, c.name))?;
            let numid = card.add_control(control.info, control.value)?;
            if let Some(added) = card.control_mut(numid) {
                added.item_names = control.item_names;
            }
        }
        Ok(card)
    }

    pub fn to_desc(&self) -> MockCardDesc {
        MockCardDesc {
            index: self.info.index,
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            controls: self.controls.iter().map(control_to_desc).collect(),
        }
    }
}

fn control_from_desc(c: &MockControlDesc) -> anyhow::Result<MockControl> {
    let iface = match c.iface.parse::<u32>() {
        Ok(raw) => Iface::from_raw(raw),
        Err(_) => Iface::from_name(&c.iface)
            .with_context(|| format!("unknown iface: {}", c.iface))?,
    };
    let id = ControlId::new(iface, c.name.clone())
        .with_numid(c.numid)
        .with_device(c.device, c.subdevice)
        .with_index(c.index);
    let mut access = Access::default();
    for word in &c.access {
        match word.as_str() {
            "read" => access.read = true,
            "write" => access.write = true,
            "inactive" => access.inactive = true,
            "volatile" => access.volatile = true,
            "locked" => access.locked = true,
            "user" => access.user = true,
            other => anyhow::bail!("unknown access flag: {other}"),
        }
    }
    let count = c.value.len() as u32;
    if count == 0 {
        anyhow::bail!("control has no value elements");
    }
    let elem_type =
        ElemType::from_name(&c.elem_type).with_context(|| format!("unknown type: {}", c.elem_type))?;
    let (info, value) = match elem_type {
        ElemType::Boolean => (
            ControlInfo::boolean(id, count),
            ControlValue::Boolean(c.value.iter().map(|v| *v != 0).collect()),
        ),
        ElemType::Integer => (
            ControlInfo::integer(id, count, c.min, c.max, c.step),
            ControlValue::Integer(c.value.clone()),
        ),
        ElemType::Integer64 => (
            ControlInfo::integer64(id, count, c.min, c.max, c.step),
            ControlValue::Integer64(c.value.clone()),
        ),
        ElemType::Enumerated => {
            let vals = c
                .value
                .iter()
                .map(|v| u32::try_from(*v).context("negative item index"))
                .collect::<anyhow::Result<Vec<u32>>>()?;
            (
                ControlInfo::enumerated(id, count, c.items.len() as u32),
                ControlValue::Enumerated(vals),
            )
        }
        ElemType::Bytes => {
            let bytes = c
                .value
                .iter()
                .map(|v| u8::try_from(*v).with_context(|| format!("byte out of range: {v}")))
                .collect::<anyhow::Result<Vec<u8>>>()?;
            (ControlInfo::bytes(id, count), ControlValue::Bytes(bytes))
        }
    };
    Ok(MockControl {
        info: info.with_access(access),
        item_names: c.items.clone(),
        value,
        broken: false,
    })
}

fn control_to_desc(c: &MockControl) -> MockControlDesc {
    let id = &c.info.id;
    let mut access = Vec::new();
    for (on, word) in [
        (c.info.access.read, "read"),
        (c.info.access.write, "write"),
        (c.info.access.inactive, "inactive"),
        (c.info.access.volatile, "volatile"),
        (c.info.access.locked, "locked"),
        (c.info.access.user, "user"),
    ] {
        if on {
            access.push(word.to_string());
        }
    }
    let value = match &c.value {
        ControlValue::Boolean(v) => v.iter().map(|b| i64::from(*b)).collect(),
        ControlValue::Integer(v) | ControlValue::Integer64(v) => v.clone(),
        ControlValue::Enumerated(v) => v.iter().map(|i| i64::from(*i)).collect(),
        ControlValue::Bytes(v) => v.iter().map(|b| i64::from(*b)).collect(),
    };
    MockControlDesc {
        numid: id.numid,
        iface: id.iface.to_string(),
        device: id.device,
        subdevice: id.subdevice,
        name: id.name.clone(),
        index: id.index,
        elem_type: c.info.elem_type.name().to_string(),
        access,
        min: c.info.min,
        max: c.info.max,
        step: c.info.step,
        items: c.item_names.clone(),
        value,
    }
}

pub fn load_card_file(path: impl AsRef<Path>) -> anyhow::Result<MockCard> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading card descriptor: {}", path.display()))?;
    let desc: MockCardDesc =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    let mut card = MockCard::from_desc(&desc)
        .with_context(|| format!("decoding card descriptor: {}", path.display()))?;
    card.source = Some(path.to_path_buf());
    Ok(card)
}

pub fn save_card_file(card: &MockCard, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let raw = serde_yaml::to_string(&card.to_desc())
        .with_context(|| format!("encoding card descriptor: {}", path.display()))?;
    fs::write(path, raw).with_context(|| format!("writing card descriptor: {}", path.display()))?;
    Ok(())
}

pub fn load_cards_dir(dir: impl AsRef<Path>) -> anyhow::Result<MockSystem> {
    let mut system = MockSystem::new();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir.as_ref())
        .with_context(|| format!("reading card directory: {}", dir.as_ref().display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    for p in entries {
        let card = load_card_file(&p)?;
        if system.card(card.info.index).is_some() {
            anyhow::bail!("duplicate card index {} in {}", card.info.index, p.display());
        }
        system.insert(card);
    }
    Ok(system)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> anyhow::Result<MockCard> {
        let mut card = MockCard::new(0, "PCH", "HDA Intel PCH");
        card.add_control(
            ControlInfo::integer(
                ControlId::new(Iface::Mixer, "Master Playback Volume"),
                2,
                0,
                31,
                1,
            ),
            ControlValue::Integer(vec![10, 20]),
        )?;
        card.add_enumerated(
            ControlId::new(Iface::Mixer, "Capture Source"),
            &["Mic", "Line"],
            vec![1],
        )?;
        Ok(card)
    }

    #[test]
    fn assigns_numids_in_order() -> anyhow::Result<()> {
        let mut card = sample()?;
        let ids = card.elem_list()?;
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].numid, 1);
        assert_eq!(ids[1].numid, 2);
        Ok(())
    }

    #[test]
    fn info_by_tuple_ignores_numid() -> anyhow::Result<()> {
        let mut card = sample()?;
        let wanted = ControlId::new(Iface::Mixer, "Capture Source").with_numid(99);
        let info = card.elem_info(&ElemAddr::Tuple(wanted))?;
        assert_eq!(info.id.numid, 2);
        assert_eq!(card.item_name(&info.id, 1)?, "Line");
        assert!(card.item_name(&info.id, 2).is_err());
        Ok(())
    }

    #[test]
    fn write_rejects_out_of_range() -> anyhow::Result<()> {
        let mut card = sample()?;
        let id = card.elem_info(&ElemAddr::Numid(1))?.id;
        assert!(card
            .elem_write(&id, &ControlValue::Integer(vec![10, 40]))
            .is_err());
        assert!(card.elem_write(&id, &ControlValue::Integer(vec![1])).is_err());
        card.elem_write(&id, &ControlValue::Integer(vec![3, 4]))?;
        assert_eq!(card.elem_read(&id)?, ControlValue::Integer(vec![3, 4]));
        Ok(())
    }

    #[test]
    fn user_controls_are_added_read_write() -> anyhow::Result<()> {
        let mut card = sample()?;
        let room = ControlId::new(Iface::Mixer, "Room").with_numid(40);
        let shape = ControlInfo::enumerated(room, 2, 3).with_access(Access::read_only());
        let items: Vec<String> = ["Small", "Hall", "Plate"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let info = card.elem_add(&shape, &items)?;
        assert_eq!(info.id.numid, 3);
        assert!(info.access.user && info.is_writable());
        assert_eq!(card.item_name(&info.id, 2)?, "Plate");
        assert_eq!(card.elem_read(&info.id)?, ControlValue::Enumerated(vec![0, 0]));
        card.elem_write(&info.id, &ControlValue::Enumerated(vec![1, 2]))?;

        assert!(card.elem_add(&shape, &items).is_err());
        let other = ControlInfo::enumerated(ControlId::new(Iface::Mixer, "Tone"), 1, 3);
        assert!(card.elem_add(&other, &items[..1]).is_err());
        Ok(())
    }

    #[test]
    fn broken_control_fails_io() -> anyhow::Result<()> {
        let mut card = sample()?;
        card.break_control(2);
        let id = card.elem_info(&ElemAddr::Numid(2))?.id;
        assert!(matches!(card.elem_read(&id), Err(TransportError::Io(_))));
        Ok(())
    }

    #[test]
    fn provider_resolves_by_index_and_id() -> anyhow::Result<()> {
        let mut system = MockSystem::new();
        system.insert(sample()?);
        system.insert(MockCard::new(3, "USB", "USB Audio"));
        assert_eq!(system.installed()?.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(system.card_index("USB")?, 3);
        assert_eq!(system.card_index("0")?, 0);
        assert!(system.card_index("2").is_err());
        let mut dev = system.open(3)?;
        assert_eq!(dev.card_info()?.id, "USB");
        Ok(())
    }

    #[test]
    fn descriptor_files_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let yaml = "index: 1\nid: USB\nname: USB Audio\ncontrols:\n  - numid: 4\n    name: Mute\n    type: bool\n    value: [0]\n  - numid: 5\n    iface: card\n    name: Calib\n    type: bytes\n    access: [read]\n    value: [222, 173]\n";
        fs::write(dir.path().join("usb.yaml"), yaml)?;
        let mut system = load_cards_dir(dir.path())?;
        let card = system.card_mut(1).context("card 1")?;
        let calib = card.control(5).context("numid 5")?;
        assert_eq!(calib.value, ControlValue::Bytes(vec![0xde, 0xad]));
        assert!(!calib.info.is_writable());
        let id = card.elem_info(&ElemAddr::Numid(4))?.id;
        card.elem_write(&id, &ControlValue::Boolean(vec![true]))?;
        system.save_cards()?;
        let reloaded = load_card_file(dir.path().join("usb.yaml"))?;
        assert_eq!(reloaded.value_of("Mute"), Some(&ControlValue::Boolean(vec![true])));
        Ok(())
    }
}
