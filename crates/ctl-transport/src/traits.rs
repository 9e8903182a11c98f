use crate::{CardInfo, CardMask, ControlId, ControlInfo, ControlValue, ElemAddr, Result};

/// A minimal blocking control interface of one open card.
///
/// Dropping the handle closes the card.
pub trait ControlDevice {
    /// Identification of the card behind this handle.
    fn card_info(&mut self) -> Result<CardInfo>;

    /// List the ids of every control on the card, in driver order.
    fn elem_list(&mut self) -> Result<Vec<ControlId>>;

    /// Query metadata by numid or by identity tuple. The returned info
    /// carries the live identity, including the current numid.
    fn elem_info(&mut self, addr: &ElemAddr) -> Result<ControlInfo>;

    /// Name of one item of an enumerated control. The device answers one
    /// item per query.
    fn item_name(&mut self, id: &ControlId, item: u32) -> Result<String>;

    /// Read the current value.
    fn elem_read(&mut self, id: &ControlId) -> Result<ControlValue>;

    /// Write a full value buffer.
    fn elem_write(&mut self, id: &ControlId, value: &ControlValue) -> Result<()>;

    /// Create a user-defined control with the shape of `info`; the numid
    /// and access of `info` are ignored. `items` names the items of an
    /// enumerated control. Returns the info of the new control.
    fn elem_add(&mut self, info: &ControlInfo, items: &[String]) -> Result<ControlInfo>;
}

impl<T: ControlDevice + ?Sized> ControlDevice for &mut T {
    fn card_info(&mut self) -> Result<CardInfo> {
        (**self).card_info()
    }

    fn elem_list(&mut self) -> Result<Vec<ControlId>> {
        (**self).elem_list()
    }

    fn elem_info(&mut self, addr: &ElemAddr) -> Result<ControlInfo> {
        (**self).elem_info(addr)
    }

    fn item_name(&mut self, id: &ControlId, item: u32) -> Result<String> {
        (**self).item_name(id, item)
    }

    fn elem_read(&mut self, id: &ControlId) -> Result<ControlValue> {
        (**self).elem_read(id)
    }

    fn elem_write(&mut self, id: &ControlId, value: &ControlValue) -> Result<()> {
        (**self).elem_write(id, value)
    }

    fn elem_add(&mut self, info: &ControlInfo, items: &[String]) -> Result<ControlInfo> {
        (**self).elem_add(info, items)
    }
}

/// Source of cards: enumerates what is installed and opens cards by index.
pub trait CardProvider {
    /// Installed card indices.
    fn installed(&self) -> Result<CardMask>;

    /// Resolve a card given by index ("0") or by id ("PCH").
    fn card_index(&self, name: &str) -> Result<u32>;

    /// Open one card. The handle borrows the provider until dropped.
    fn open(&mut self, card: u32) -> Result<Box<dyn ControlDevice + '_>>;
}
