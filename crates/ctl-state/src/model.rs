use core::fmt;
use ctl_transport::{Access, ControlId, ControlInfo, ElemType};

/// One field of a control identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IdField {
    Numid,
    Iface,
    Device,
    Subdevice,
    Name,
    Index,
}

impl IdField {
    pub fn name(self) -> &'static str {
        match self {
            IdField::Numid => "numid",
            IdField::Iface => "iface",
            IdField::Device => "device",
            IdField::Subdevice => "subdevice",
            IdField::Name => "name",
            IdField::Index => "index",
        }
    }

    /// `stored/live` rendering of this field for two ids.
    pub fn describe(self, stored: &ControlId, live: &ControlId) -> String {
        match self {
            IdField::Numid => format!("{}/{}", stored.numid, live.numid),
            IdField::Iface => format!("{}/{}", stored.iface, live.iface),
            IdField::Device => format!("{}/{}", stored.device, live.device),
            IdField::Subdevice => format!("{}/{}", stored.subdevice, live.subdevice),
            IdField::Name => format!("'{}'/'{}'", stored.name, live.name),
            IdField::Index => format!("{}/{}", stored.index, live.index),
        }
    }
}

impl fmt::Display for IdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compare the stable identity tuple; `numid` is ignored.
pub fn ids_equal(a: &ControlId, b: &ControlId) -> bool {
    a.iface == b.iface
        && a.device == b.device
        && a.subdevice == b.subdevice
        && a.name == b.name
        && a.index == b.index
}

/// Fields in which `live` differs from `stored`, in a fixed order.
pub fn id_mismatches(stored: &ControlId, live: &ControlId, check_numid: bool) -> Vec<IdField> {
    let mut out = Vec::new();
    if check_numid && stored.numid != live.numid {
        out.push(IdField::Numid);
    }
    if stored.iface != live.iface {
        out.push(IdField::Iface);
    }
    if stored.device != live.device {
        out.push(IdField::Device);
    }
    if stored.subdevice != live.subdevice {
        out.push(IdField::Subdevice);
    }
    if stored.name != live.name {
        out.push(IdField::Name);
    }
    if stored.index != live.index {
        out.push(IdField::Index);
    }
    out
}

/// A boolean control must report the range 0..1 with no step.
pub fn boolean_range_ok(info: &ControlInfo) -> bool {
    info.elem_type != ElemType::Boolean || (info.min == 0 && info.max == 1 && info.step == 0)
}

/// Space-separated access words, e.g. `"read write"`.
pub fn access_string(access: &Access) -> String {
    let words = [
        (access.read, "read"),
        (access.write, "write"),
        (access.inactive, "inactive"),
        (access.volatile, "volatile"),
        (access.locked, "locked"),
        (access.user, "user"),
    ];
    words
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, word)| *word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"min - max (step N)"`, without the step part when the step is zero.
pub fn range_string(info: &ControlInfo) -> String {
    if info.step != 0 {
        format!("{} - {} (step {})", info.min, info.max, info.step)
    } else {
        format!("{} - {}", info.min, info.max)
    }
}

/// Inverse of [`range_string`]: `(min, max, step)`, step 0 when absent.
pub fn parse_range(s: &str) -> Option<(i64, i64, i64)> {
    let (bounds, step) = match s.split_once("(step") {
        Some((bounds, rest)) => (bounds, rest.trim().strip_suffix(')')?.trim().parse().ok()?),
        None => (s, 0),
    };
    let (min, max) = bounds.split_once(" - ")?;
    Some((min.trim().parse().ok()?, max.trim().parse().ok()?, step))
}

/// A stored type name matches the live type, or both are numeric kinds
/// that share a value representation.
pub fn type_compatible(stored: &str, live: ElemType) -> bool {
    match ElemType::from_name(stored) {
        Some(t) if t == live => true,
        Some(t) => t != ElemType::Bytes && live != ElemType::Bytes,
        None => false,
    }
}
