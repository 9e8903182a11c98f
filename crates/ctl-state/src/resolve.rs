use crate::model::{id_mismatches, ids_equal, IdField};
use ctl_transport::{ControlDevice, ControlId, ControlInfo, ElemAddr};

/// Outcome of matching a stored identity against the live card.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Resolved(ControlInfo),
    /// A live control was found but differs from the stored identity.
    Mismatch {
        info: ControlInfo,
        fields: Vec<IdField>,
    },
    NotFound {
        reason: String,
    },
}

/// Two-stage lookup: by numid first, then by the identity tuple.
///
/// With `skip_numid` the numid is neither queried nor compared.
pub fn resolve<D: ControlDevice + ?Sized>(
    dev: &mut D,
    stored: &ControlId,
    skip_numid: bool,
) -> Resolution {
    let by_numid = if skip_numid || stored.numid == 0 {
        None
    } else {
        Some(dev.elem_info(&ElemAddr::Numid(stored.numid)))
    };
    if let Some(Ok(info)) = &by_numid {
        if ids_equal(stored, &info.id) {
            return Resolution::Resolved(info.clone());
        }
    }

    let by_tuple = if stored.name.is_empty() {
        Err("no control name stored".to_string())
    } else {
        dev.elem_info(&ElemAddr::Tuple(stored.clone()))
            .map_err(|e| e.to_string())
    };
    match (by_tuple, by_numid) {
        (Ok(info), _) => {
            let fields = id_mismatches(stored, &info.id, !skip_numid);
            if fields.is_empty() {
                Resolution::Resolved(info)
            } else {
                Resolution::Mismatch { info, fields }
            }
        }
        (Err(_), Some(Ok(info))) => {
            let fields = id_mismatches(stored, &info.id, true);
            Resolution::Mismatch { info, fields }
        }
        (Err(reason), _) => Resolution::NotFound { reason },
    }
}
