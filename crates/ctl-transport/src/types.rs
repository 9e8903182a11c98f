use core::fmt;

/// Interface class a control is attached to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Iface {
    Card,
    Hwdep,
    Mixer,
    Pcm,
    Rawmidi,
    Timer,
    Sequencer,
    /// Interface number the backend reported but this crate has no name for.
    Unknown(u32),
}

impl Iface {
    pub const NAMED: [Iface; 7] = [
        Iface::Card,
        Iface::Hwdep,
        Iface::Mixer,
        Iface::Pcm,
        Iface::Rawmidi,
        Iface::Timer,
        Iface::Sequencer,
    ];

    pub fn from_raw(raw: u32) -> Self {
        Self::NAMED
            .get(raw as usize)
            .copied()
            .unwrap_or(Iface::Unknown(raw))
    }

    pub fn raw(self) -> u32 {
        match self {
            Iface::Card => 0,
            Iface::Hwdep => 1,
            Iface::Mixer => 2,
            Iface::Pcm => 3,
            Iface::Rawmidi => 4,
            Iface::Timer => 5,
            Iface::Sequencer => 6,
            Iface::Unknown(raw) => raw,
        }
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            Iface::Card => Some("card"),
            Iface::Hwdep => Some("hwdep"),
            Iface::Mixer => Some("mixer"),
            Iface::Pcm => Some("pcm"),
            Iface::Rawmidi => Some("rawmidi"),
            Iface::Timer => Some("timer"),
            Iface::Sequencer => Some("sequencer"),
            Iface::Unknown(_) => None,
        }
    }

    /// Case-insensitive lookup of a symbolic interface name.
    pub fn from_name(s: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .copied()
            .find(|i| i.name().is_some_and(|n| n.eq_ignore_ascii_case(s)))
    }
}

impl fmt::Display for Iface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.raw()),
        }
    }
}

/// Value type of a control element.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ElemType {
    Boolean,
    Integer,
    Integer64,
    Enumerated,
    Bytes,
}

impl ElemType {
    pub const ALL: [ElemType; 5] = [
        ElemType::Boolean,
        ElemType::Integer,
        ElemType::Integer64,
        ElemType::Enumerated,
        ElemType::Bytes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ElemType::Boolean => "bool",
            ElemType::Integer => "integer",
            ElemType::Integer64 => "integer64",
            ElemType::Enumerated => "enumerated",
            ElemType::Bytes => "bytes",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == s)
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Access flags reported for a control.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub inactive: bool,
    pub volatile: bool,
    pub locked: bool,
    pub user: bool,
}

impl Access {
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }
}

/// Identity of one control element.
///
/// `(iface, device, subdevice, name, index)` is the stable part; `numid` is
/// assigned by the driver and may change between boots.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ControlId {
    pub numid: u32,
    pub iface: Iface,
    pub device: u32,
    pub subdevice: u32,
    pub name: String,
    pub index: u32,
}

impl ControlId {
    pub fn new(iface: Iface, name: impl Into<String>) -> Self {
        Self {
            numid: 0,
            iface,
            device: 0,
            subdevice: 0,
            name: name.into(),
            index: 0,
        }
    }

    pub fn with_numid(mut self, numid: u32) -> Self {
        self.numid = numid;
        self
    }

    pub fn with_device(mut self, device: u32, subdevice: u32) -> Self {
        self.device = device;
        self.subdevice = subdevice;
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "numid={},iface={}", self.numid, self.iface)?;
        if self.device != 0 {
            write!(f, ",device={}", self.device)?;
        }
        if self.subdevice != 0 {
            write!(f, ",subdevice={}", self.subdevice)?;
        }
        write!(f, ",name='{}'", self.name)?;
        if self.index != 0 {
            write!(f, ",index={}", self.index)?;
        }
        Ok(())
    }
}

/// How a control is looked up: by the driver's numeric id, or by its
/// identity tuple (the `numid` field of the tuple is ignored).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ElemAddr {
    Numid(u32),
    Tuple(ControlId),
}

impl fmt::Display for ElemAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemAddr::Numid(numid) => write!(f, "numid={numid}"),
            ElemAddr::Tuple(id) => write!(
                f,
                "iface={},device={},subdevice={},name='{}',index={}",
                id.iface, id.device, id.subdevice, id.name, id.index
            ),
        }
    }
}

/// Static metadata of a control.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlInfo {
    pub id: ControlId,
    pub elem_type: ElemType,
    pub access: Access,
    /// Number of value elements (bytes for `Bytes`).
    pub count: u32,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    /// Number of items of an enumerated control.
    pub items: u32,
}

impl ControlInfo {
    fn base(id: ControlId, elem_type: ElemType, count: u32) -> Self {
        Self {
            id,
            elem_type,
            access: Access::read_write(),
            count,
            min: 0,
            max: 0,
            step: 0,
            items: 0,
        }
    }

    pub fn boolean(id: ControlId, count: u32) -> Self {
        Self {
            max: 1,
            ..Self::base(id, ElemType::Boolean, count)
        }
    }

    pub fn integer(id: ControlId, count: u32, min: i64, max: i64, step: i64) -> Self {
        Self {
            min,
            max,
            step,
            ..Self::base(id, ElemType::Integer, count)
        }
    }

    pub fn integer64(id: ControlId, count: u32, min: i64, max: i64, step: i64) -> Self {
        Self {
            min,
            max,
            step,
            ..Self::base(id, ElemType::Integer64, count)
        }
    }

    pub fn enumerated(id: ControlId, count: u32, items: u32) -> Self {
        Self {
            items,
            ..Self::base(id, ElemType::Enumerated, count)
        }
    }

    pub fn bytes(id: ControlId, count: u32) -> Self {
        Self::base(id, ElemType::Bytes, count)
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn is_readable(&self) -> bool {
        self.access.read
    }

    pub fn is_writable(&self) -> bool {
        self.access.write
    }

    pub fn is_inactive(&self) -> bool {
        self.access.inactive
    }
}

/// Current value of a control; one entry per element.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlValue {
    Boolean(Vec<bool>),
    Integer(Vec<i64>),
    Integer64(Vec<i64>),
    Enumerated(Vec<u32>),
    Bytes(Vec<u8>),
}

impl ControlValue {
    pub fn elem_type(&self) -> ElemType {
        match self {
            ControlValue::Boolean(_) => ElemType::Boolean,
            ControlValue::Integer(_) => ElemType::Integer,
            ControlValue::Integer64(_) => ElemType::Integer64,
            ControlValue::Enumerated(_) => ElemType::Enumerated,
            ControlValue::Bytes(_) => ElemType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ControlValue::Boolean(v) => v.len(),
            ControlValue::Integer(v) | ControlValue::Integer64(v) => v.len(),
            ControlValue::Enumerated(v) => v.len(),
            ControlValue::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identification of one sound card.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardInfo {
    pub index: u32,
    /// Short string id, used as the card key in state documents.
    pub id: String,
    pub name: String,
}

/// Bitmask of installed card indices.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CardMask(u64);

impl CardMask {
    pub const MAX_CARDS: u32 = 64;

    pub fn insert(&mut self, card: u32) {
        if card < Self::MAX_CARDS {
            self.0 |= 1 << card;
        }
    }

    pub fn contains(self, card: u32) -> bool {
        card < Self::MAX_CARDS && self.0 & (1 << card) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Installed indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..Self::MAX_CARDS).filter(move |c| self.contains(*c))
    }
}
