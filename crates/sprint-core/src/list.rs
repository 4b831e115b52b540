// ── Item lists ──
//
// Read side of list-shaped view models: counted, positionally indexed,
// with an optional message to show when empty.

use std::sync::Arc;

use futures_core::Stream;

use crate::property::MutableProperty;
use crate::view_model::ViewModel;

/// Positional read access to a list of items.
pub trait ItemList {
    type Item;

    fn count(&self) -> usize;

    /// Item at `index`, or `None` when out of range.
    fn item(&self, index: usize) -> Option<Arc<Self::Item>>;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Message to show in place of an empty list.
    fn localized_empty_message(&self) -> Option<String> {
        None
    }

    /// Index of the first item matching `predicate`.
    fn position<P>(&self, mut predicate: P) -> Option<usize>
    where
        P: FnMut(&Self::Item) -> bool,
    {
        (0..self.count()).find(|&index| self.item(index).is_some_and(|item| predicate(&item)))
    }
}

/// View model over a constant list.
#[derive(Debug)]
pub struct ArrayViewModel<T> {
    view_model: ViewModel,
    items: Vec<Arc<T>>,
    empty_message: MutableProperty<Option<String>>,
}

impl<T> ArrayViewModel<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self::with_empty_message(items, None, None)
    }

    pub fn with_title(items: impl IntoIterator<Item = T>, title: impl Into<String>) -> Self {
        Self::with_empty_message(items, Some(title.into()), None)
    }

    pub fn with_empty_message(
        items: impl IntoIterator<Item = T>,
        title: Option<String>,
        empty_message: Option<String>,
    ) -> Self {
        let view_model = ViewModel::new();
        view_model.set_title(title);
        Self {
            view_model,
            items: items.into_iter().map(Arc::new).collect(),
            empty_message: MutableProperty::new(empty_message),
        }
    }

    pub fn view_model(&self) -> &ViewModel {
        &self.view_model
    }

    pub fn items(&self) -> &[Arc<T>] {
        &self.items
    }

    pub fn set_empty_message(&self, message: Option<String>) -> bool {
        self.empty_message.set(message)
    }

    pub fn observe_empty_message(&self) -> impl Stream<Item = Option<String>> + Send + 'static {
        self.empty_message.observe()
    }
}

impl<T> ItemList for ArrayViewModel<T> {
    type Item = T;

    fn count(&self) -> usize {
        self.items.len()
    }

    fn item(&self, index: usize) -> Option<Arc<T>> {
        self.items.get(index).cloned()
    }

    fn localized_empty_message(&self) -> Option<String> {
        self.empty_message.get()
    }
}
