use crate::encode::item_names;
use crate::model::{parse_range, type_compatible, IdField};
use crate::resolve::{resolve, Resolution};
use crate::{Result, StateError};
use ctl_transport::{ControlDevice, ControlId, ControlInfo, ControlValue, ElemType, Iface};
use serde::{Deserialize, Serialize};
use state_tree::{Node, Value};
use tracing::{debug, info, warn};

/// What to do when the live control differs from the stored identity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Log each differing field and write to the live control.
    #[default]
    Warn,
    /// Refuse to write; the mismatch is a data error.
    Strict,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Skip the numid fast path, accept a compound where a scalar is
    /// expected, and keep going past per-control errors.
    pub force: bool,
    /// Validate everything, write nothing.
    pub dry_run: bool,
    pub mismatch: MismatchPolicy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Written,
    /// Dry run: the value decoded cleanly but was not written.
    Validated,
    NotWritable,
    Inactive,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Restored {
    pub status: RestoreStatus,
    pub mismatches: Vec<IdField>,
}

/// The parsed fields of one stored control subtree.
#[derive(Clone, Debug)]
pub struct StoredControl<'a> {
    pub id: ControlId,
    pub value: &'a Node,
    pub comment: Option<&'a Node>,
}

impl StoredControl<'_> {
    fn has_access(&self, word: &str) -> bool {
        self.comment
            .and_then(|c| c.search("access"))
            .and_then(Node::as_str)
            .is_some_and(|s| s.split_whitespace().any(|w| w == word))
    }

    /// True when the stored metadata marks the control inactive.
    pub fn was_inactive(&self) -> bool {
        self.has_access("inactive")
    }

    /// True for a control an application created at run time.
    pub fn is_user(&self) -> bool {
        self.has_access("user")
    }

    /// The `comment.type` string, when present.
    pub fn stored_type(&self) -> Option<&str> {
        self.comment
            .and_then(|c| c.search("type"))
            .and_then(Node::as_str)
    }
}

pub fn parse_control(node: &Node) -> Result<StoredControl<'_>> {
    let numid = node.id().parse::<u32>().map_err(|_| {
        StateError::Document(format!("control key '{}' is not a numid", node.id()))
    })?;
    if !node.is_compound() {
        return Err(StateError::data(numid, "control is not a compound"));
    }
    let mut id = ControlId::new(Iface::Mixer, "").with_numid(numid);
    let mut value = None;
    let mut comment = None;
    for field in node.children() {
        match field.id() {
            "comment" => {
                if !field.is_compound() {
                    return Err(StateError::data(numid, "comment is not a compound"));
                }
                comment = Some(field);
            }
            "iface" => id.iface = parse_iface(field, numid)?,
            "device" => id.device = unsigned_field(field, numid)?,
            "subdevice" => id.subdevice = unsigned_field(field, numid)?,
            "index" => id.index = unsigned_field(field, numid)?,
            "name" => {
                id.name = field
                    .as_str()
                    .ok_or_else(|| StateError::data(numid, "name is not a string"))?
                    .to_string();
            }
            "value" => value = Some(field),
            other => return Err(StateError::data(numid, format!("unknown field '{other}'"))),
        }
    }
    let value = value.ok_or_else(|| StateError::data(numid, "missing value"))?;
    Ok(StoredControl { id, value, comment })
}

fn parse_iface(field: &Node, numid: u32) -> Result<Iface> {
    match field.value() {
        Value::Integer(raw) => u32::try_from(*raw)
            .map(Iface::from_raw)
            .map_err(|_| StateError::data(numid, format!("invalid iface {raw}"))),
        Value::String(s) => Iface::from_name(s)
            .ok_or_else(|| StateError::data(numid, format!("unknown iface '{s}'"))),
        Value::Compound(_) => Err(StateError::data(numid, "iface is a compound")),
    }
}

fn unsigned_field(field: &Node, numid: u32) -> Result<u32> {
    field
        .as_integer()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| StateError::data(numid, format!("{} is not a valid index", field.id())))
}

/// Resolve one stored control on the live card and write its value.
pub fn decode_control<D: ControlDevice + ?Sized>(
    dev: &mut D,
    node: &Node,
    opts: &RestoreOptions,
) -> Result<Restored> {
    let stored = parse_control(node)?;
    let numid = stored.id.numid;
    let (info, mismatches) = match resolve(dev, &stored.id, opts.force) {
        Resolution::Resolved(info) => (info, Vec::new()),
        Resolution::Mismatch { info, fields } => (info, fields),
        Resolution::NotFound { .. } if stored.is_user() => {
            let (shape, items) = user_control_shape(&stored)?;
            if opts.dry_run {
                debug!(control = numid, "user control would be created");
                return Ok(Restored {
                    status: RestoreStatus::Validated,
                    mismatches: Vec::new(),
                });
            }
            let info = dev
                .elem_add(&shape, &items)
                .map_err(StateError::control(numid))?;
            info!(control = %info.id, "re-created user control #{numid}");
            (info, Vec::new())
        }
        Resolution::NotFound { reason } => {
            return Err(StateError::ControlNotFound {
                numid,
                id: stored.id.to_string(),
                reason,
            })
        }
    };
    if let Some(stored_type) = stored.stored_type() {
        if !type_compatible(stored_type, info.elem_type) {
            warn!(
                control = numid,
                stored = stored_type,
                live = %info.elem_type,
                "incompatible field type for control #{numid}"
            );
        }
    }
    for field in &mismatches {
        warn!(
            control = numid,
            field = %field,
            "{field} mismatch ({}) for control #{numid}",
            field.describe(&stored.id, &info.id)
        );
    }
    if !mismatches.is_empty() && opts.mismatch == MismatchPolicy::Strict {
        let names: Vec<&str> = mismatches.iter().map(|f| f.name()).collect();
        return Err(StateError::data(
            numid,
            format!("identity mismatch in {}", names.join(", ")),
        ));
    }

    let status = if info.is_inactive() || stored.was_inactive() {
        RestoreStatus::Inactive
    } else if !info.is_writable() {
        RestoreStatus::NotWritable
    } else {
        let value = decode_value(dev, &info, stored.value, opts.force)?;
        if opts.dry_run {
            RestoreStatus::Validated
        } else {
            dev.elem_write(&info.id, &value)
                .map_err(StateError::control(info.id.numid))?;
            RestoreStatus::Written
        }
    };
    debug!(control = %info.id, ?status, "restore");
    Ok(Restored { status, mismatches })
}

/// Shape and item names of a user control, rebuilt from its comment.
///
/// A missing or non-positive count means one element; a missing range
/// means `0 - 0`.
fn user_control_shape(stored: &StoredControl<'_>) -> Result<(ControlInfo, Vec<String>)> {
    let numid = stored.id.numid;
    let comment = stored
        .comment
        .ok_or_else(|| StateError::data(numid, "user control without a comment"))?;
    let elem_type = stored
        .stored_type()
        .and_then(ElemType::from_name)
        .ok_or_else(|| StateError::data(numid, "user control without a known type"))?;
    let count = match comment.search("count").and_then(Node::as_integer) {
        Some(n) if n > 0 => u32::try_from(n)
            .map_err(|_| StateError::data(numid, format!("invalid count {n}")))?,
        _ => 1,
    };
    let id = ControlId {
        numid: 0,
        ..stored.id.clone()
    };
    let mut items = Vec::new();
    let info = match elem_type {
        ElemType::Boolean => ControlInfo::boolean(id, count),
        ElemType::Bytes => ControlInfo::bytes(id, count),
        ElemType::Integer | ElemType::Integer64 => {
            let (min, max, step) = match comment.search("range") {
                None => (0, 0, 0),
                Some(range) => range
                    .as_str()
                    .and_then(parse_range)
                    .ok_or_else(|| StateError::data(numid, "invalid comment range"))?,
            };
            if min > max || step < 0 || i128::from(step) > i128::from(max) - i128::from(min) {
                return Err(StateError::data(
                    numid,
                    format!("invalid range {min} - {max} (step {step})"),
                ));
            }
            if elem_type == ElemType::Integer {
                ControlInfo::integer(id, count, min, max, step)
            } else {
                ControlInfo::integer64(id, count, min, max, step)
            }
        }
        ElemType::Enumerated => {
            items = comment_items(comment, numid)?;
            ControlInfo::enumerated(id, count, items.len() as u32)
        }
    };
    Ok((info, items))
}

/// The `comment.item` table in index order; every index must be present.
fn comment_items(comment: &Node, numid: u32) -> Result<Vec<String>> {
    let table = comment
        .search("item")
        .filter(|t| t.is_compound())
        .ok_or_else(|| StateError::data(numid, "user control without an item table"))?;
    let mut slots: Vec<Option<String>> = vec![None; table.children().len()];
    for item in table.children() {
        let slot = item
            .id()
            .parse::<usize>()
            .ok()
            .and_then(|idx| slots.get_mut(idx))
            .ok_or_else(|| StateError::data(numid, format!("bad item index '{}'", item.id())))?;
        let name = item
            .as_str()
            .ok_or_else(|| StateError::data(numid, "item name is not a string"))?;
        *slot = Some(name.to_string());
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .filter(|names| !names.is_empty())
        .ok_or_else(|| StateError::data(numid, "incomplete item table"))
}

/// Item-name table of one enumerated control, fetched on first use.
struct ItemTable {
    names: Option<Vec<String>>,
}

impl ItemTable {
    fn lookup<D: ControlDevice + ?Sized>(
        &mut self,
        dev: &mut D,
        info: &ControlInfo,
        name: &str,
    ) -> Result<Option<u32>> {
        if self.names.is_none() {
            self.names = Some(item_names(dev, info)?);
        }
        Ok(self
            .names
            .as_ref()
            .and_then(|names| names.iter().position(|n| n == name))
            .map(|pos| pos as u32))
    }
}

/// Decode a stored `value` node against the live control's metadata.
pub fn decode_value<D: ControlDevice + ?Sized>(
    dev: &mut D,
    info: &ControlInfo,
    node: &Node,
    force: bool,
) -> Result<ControlValue> {
    let numid = info.id.numid;
    let count = info.count as usize;
    if info.elem_type == ElemType::Bytes {
        let hex = node
            .as_str()
            .ok_or_else(|| StateError::data(numid, "bytes value must be a hex string"))?;
        return parse_hex(hex, count)
            .map(ControlValue::Bytes)
            .map_err(|reason| StateError::data(numid, reason));
    }

    let mut items = ItemTable { names: None };
    let mut raw = vec![0i64; count];
    if count == 1 {
        let elem = if node.is_compound() {
            match node.children().first() {
                Some(first) if force => first,
                _ => {
                    return Err(StateError::data(
                        numid,
                        "expected a scalar value, found a compound",
                    ))
                }
            }
        } else {
            node
        };
        raw[0] = decode_element(dev, info, &mut items, elem)?;
        return Ok(build_value(info.elem_type, raw));
    }

    if !node.is_compound() {
        if !force {
            return Err(StateError::data(numid, "expected a compound value"));
        }
        let v = decode_element(dev, info, &mut items, node)?;
        return Ok(build_value(info.elem_type, vec![v; count]));
    }

    if force {
        if let Ok(current) = dev.elem_read(&info.id) {
            if current.len() == count {
                raw = raw_elements(&current);
            }
        }
    }
    let mut set = vec![false; count];
    for child in node.children() {
        let idx = match child.id().parse::<usize>() {
            Ok(idx) if idx < count && !set[idx] => idx,
            _ if force => {
                warn!(control = numid, index = child.id(), "bad value index ignored");
                continue;
            }
            Ok(idx) if idx < count => {
                return Err(StateError::data(numid, format!("duplicate value index {idx}")))
            }
            _ => {
                return Err(StateError::data(
                    numid,
                    format!("bad value index '{}'", child.id()),
                ))
            }
        };
        raw[idx] = decode_element(dev, info, &mut items, child)?;
        set[idx] = true;
    }
    if let Some(missing) = set.iter().position(|s| !s) {
        if !force {
            return Err(StateError::data(
                numid,
                format!("missing value index {missing}"),
            ));
        }
        warn!(control = numid, index = missing, "value index not specified");
    }
    Ok(build_value(info.elem_type, raw))
}

fn decode_element<D: ControlDevice + ?Sized>(
    dev: &mut D,
    info: &ControlInfo,
    items: &mut ItemTable,
    node: &Node,
) -> Result<i64> {
    let numid = info.id.numid;
    match (info.elem_type, node.value()) {
        (ElemType::Boolean, Value::Integer(v)) if *v == 0 || *v == 1 => Ok(*v),
        (ElemType::Boolean, Value::String(s)) => match s.as_str() {
            "true" | "on" => Ok(1),
            "false" | "off" => Ok(0),
            _ => Err(StateError::data(numid, format!("invalid boolean '{s}'"))),
        },
        (ElemType::Boolean, _) => Err(StateError::data(numid, "invalid boolean value")),
        (ElemType::Integer | ElemType::Integer64, Value::Integer(v)) => Ok(*v),
        (ElemType::Integer | ElemType::Integer64, _) => {
            Err(StateError::data(numid, "expected an integer value"))
        }
        (ElemType::Enumerated, Value::Integer(v)) => u32::try_from(*v)
            .map(i64::from)
            .map_err(|_| StateError::data(numid, format!("invalid item index {v}"))),
        (ElemType::Enumerated, Value::String(s)) => {
            if let Some(idx) = items.lookup(dev, info, s)? {
                return Ok(i64::from(idx));
            }
            s.parse::<u32>()
                .map(i64::from)
                .map_err(|_| StateError::data(numid, format!("unknown item '{s}'")))
        }
        (ElemType::Enumerated, Value::Compound(_)) => {
            Err(StateError::data(numid, "invalid enumerated value"))
        }
        (ElemType::Bytes, Value::Integer(v)) if (0..=255).contains(v) => Ok(*v),
        (ElemType::Bytes, _) => Err(StateError::data(numid, "invalid byte value")),
    }
}

fn build_value(elem_type: ElemType, raw: Vec<i64>) -> ControlValue {
    match elem_type {
        ElemType::Boolean => ControlValue::Boolean(raw.iter().map(|v| *v != 0).collect()),
        ElemType::Integer => ControlValue::Integer(raw),
        ElemType::Integer64 => ControlValue::Integer64(raw),
        ElemType::Enumerated => ControlValue::Enumerated(raw.iter().map(|v| *v as u32).collect()),
        ElemType::Bytes => ControlValue::Bytes(raw.iter().map(|v| *v as u8).collect()),
    }
}

fn raw_elements(value: &ControlValue) -> Vec<i64> {
    match value {
        ControlValue::Boolean(v) => v.iter().map(|b| i64::from(*b)).collect(),
        ControlValue::Integer(v) | ControlValue::Integer64(v) => v.clone(),
        ControlValue::Enumerated(v) => v.iter().map(|i| i64::from(*i)).collect(),
        ControlValue::Bytes(v) => v.iter().map(|b| i64::from(*b)).collect(),
    }
}

/// Parse exactly `count` bytes from a hex string.
pub fn parse_hex(s: &str, count: usize) -> Result<Vec<u8>, String> {
    if s.len() != count * 2 {
        return Err(format!(
            "hex value has {} characters, expected {}",
            s.len(),
            count * 2
        ));
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16);
            let lo = (pair[1] as char).to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok(((hi << 4) | lo) as u8),
                _ => Err(format!(
                    "invalid hex digits '{}'",
                    String::from_utf8_lossy(pair)
                )),
            }
        })
        .collect()
}
