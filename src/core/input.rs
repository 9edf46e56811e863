use std::sync::Arc;
use super::types::SelectedFile;

pub type ChangeListener = Box<dyn Fn(Vec<SelectedFile>) + Send + Sync>;

/// A file-picking input owned by the UI layer.
///
/// The manager never owns inputs; it keeps them registered so their value can
/// be reset after a batch completes or a file is removed.
pub trait UploadInput: Send + Sync {
    /// Whether a change listener was already attached to this input.
    fn has_listener(&self) -> bool;

    /// Flag the input as bound. Called once, right before `add_change_listener`.
    fn mark_listener(&self);

    /// Invoke `listener` with the current selection whenever it changes.
    fn add_change_listener(&self, listener: ChangeListener);

    /// Drop the current selection so it cannot be submitted again.
    fn clear_value(&self);
}

/// Inputs are compared by identity, never by content.
pub(crate) fn same_input(a: &Arc<dyn UploadInput>, b: &Arc<dyn UploadInput>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
