use crate::model::{access_string, boolean_range_ok, range_string};
use crate::{Result, StateError};
use ctl_transport::{ControlDevice, ControlId, ControlInfo, ControlValue, ElemAddr, ElemType};
use state_tree::Node;
use tracing::{debug, warn};

/// Read one control and append its subtree (keyed by numid) to `top`.
///
/// Returns `Ok(false)` when the control is not readable and nothing was
/// emitted. The subtree is only attached once it is complete.
pub fn encode_control<D: ControlDevice + ?Sized>(
    dev: &mut D,
    id: &ControlId,
    top: &mut Node,
) -> Result<bool> {
    let addr = if id.numid != 0 {
        ElemAddr::Numid(id.numid)
    } else {
        ElemAddr::Tuple(id.clone())
    };
    let info = dev.elem_info(&addr).map_err(StateError::control(id.numid))?;
    let numid = info.id.numid;
    if !info.is_readable() {
        debug!(control = %info.id, "not readable, skipped");
        return Ok(false);
    }
    let value = dev.elem_read(&info.id).map_err(StateError::control(numid))?;
    if value.elem_type() != info.elem_type || value.len() != info.count as usize {
        return Err(StateError::data(
            numid,
            format!(
                "device returned {} x{} for a {} x{} control",
                value.elem_type(),
                value.len(),
                info.elem_type,
                info.count
            ),
        ));
    }
    if !boolean_range_ok(&info) {
        warn!(
            control = %info.id,
            min = info.min,
            max = info.max,
            step = info.step,
            "boolean control reports an unexpected range"
        );
    }

    let mut comment = Node::compound("comment");
    comment.add(Node::string("access", access_string(&info.access)))?;
    comment.add(Node::string("type", info.elem_type.name()))?;
    comment.add(Node::integer("count", i64::from(info.count)))?;
    let mut items = Vec::new();
    match info.elem_type {
        ElemType::Integer | ElemType::Integer64 => {
            comment.add(Node::string("range", range_string(&info)))?;
        }
        ElemType::Enumerated => {
            items = item_names(dev, &info)?;
            let table = comment.add(Node::compound("item"))?;
            for (idx, name) in items.iter().enumerate() {
                table.add(Node::string(idx.to_string(), name.as_str()))?;
            }
        }
        ElemType::Boolean | ElemType::Bytes => {}
    }

    let mut control = Node::compound(numid.to_string());
    match info.id.iface.name() {
        Some(name) => control.add(Node::string("iface", name))?,
        None => control.add(Node::integer("iface", i64::from(info.id.iface.raw())))?,
    };
    if info.id.device != 0 {
        control.add(Node::integer("device", i64::from(info.id.device)))?;
    }
    if info.id.subdevice != 0 {
        control.add(Node::integer("subdevice", i64::from(info.id.subdevice)))?;
    }
    control.add(Node::string("name", info.id.name.as_str()))?;
    if info.id.index != 0 {
        control.add(Node::integer("index", i64::from(info.id.index)))?;
    }
    control.add(encode_value(&value, &items)?)?;
    control.add(comment)?;

    top.add(control)?;
    debug!(control = %info.id, "stored");
    Ok(true)
}

/// Item names of an enumerated control, one device query per item.
pub(crate) fn item_names<D: ControlDevice + ?Sized>(
    dev: &mut D,
    info: &ControlInfo,
) -> Result<Vec<String>> {
    (0..info.items)
        .map(|item| {
            dev.item_name(&info.id, item)
                .map_err(StateError::control(info.id.numid))
        })
        .collect()
}

fn encode_value(value: &ControlValue, items: &[String]) -> Result<Node> {
    if let ControlValue::Bytes(bytes) = value {
        return Ok(Node::string("value", hex_string(bytes)));
    }
    if value.len() == 1 {
        return Ok(element("value", value, 0, items));
    }
    let mut node = Node::compound("value");
    for idx in 0..value.len() {
        node.add(element(&idx.to_string(), value, idx, items))?;
    }
    Ok(node)
}

fn element(id: &str, value: &ControlValue, idx: usize, items: &[String]) -> Node {
    match value {
        ControlValue::Boolean(v) => Node::string(id, if v[idx] { "true" } else { "false" }),
        ControlValue::Integer(v) | ControlValue::Integer64(v) => Node::integer(id, v[idx]),
        ControlValue::Enumerated(v) => match items.get(v[idx] as usize) {
            Some(name) => Node::string(id, name.as_str()),
            None => Node::integer(id, i64::from(v[idx])),
        },
        ControlValue::Bytes(v) => Node::integer(id, i64::from(v[idx])),
    }
}

/// Lower-case hex, two digits per byte, no separators.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
