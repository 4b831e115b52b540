// ── Model capabilities ──
//
// Data models opt into save / fetch / delete independently. A
// `ModelViewModel` offers an action for each capability its model has,
// all owned by the same view model and therefore mutually exclusive.

use std::future::Future;
use std::sync::Arc;

use crate::action::Action;
use crate::error::ViewModelError;
use crate::view_model::ViewModel;

/// A model that can be saved. Resolves to the saved model.
pub trait Saveable: Sized + Send + Sync + 'static {
    type SaveInput: Send + 'static;
    type SaveError: ViewModelError;

    fn save(
        self: Arc<Self>,
        input: Self::SaveInput,
    ) -> impl Future<Output = Result<Self, Self::SaveError>> + Send + 'static;
}

/// A model that can be (re)fetched. Resolves to the fresh model.
pub trait Fetchable: Sized + Send + Sync + 'static {
    type FetchInput: Send + 'static;
    type FetchError: ViewModelError;

    fn fetch(
        self: Arc<Self>,
        input: Self::FetchInput,
    ) -> impl Future<Output = Result<Self, Self::FetchError>> + Send + 'static;
}

/// A model that can be deleted. Resolves to the deleted model.
pub trait Deletable: Sized + Send + Sync + 'static {
    type DeleteInput: Send + 'static;
    type DeleteError: ViewModelError;

    fn delete(
        self: Arc<Self>,
        input: Self::DeleteInput,
    ) -> impl Future<Output = Result<Self, Self::DeleteError>> + Send + 'static;
}

/// View model wrapping a single model.
#[derive(Debug)]
pub struct ModelViewModel<M> {
    view_model: ViewModel,
    model: Arc<M>,
}

impl<M> ModelViewModel<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(model: M) -> Self {
        Self::with_view_model(ViewModel::new(), Arc::new(model))
    }

    pub fn with_title(title: impl Into<String>, model: M) -> Self {
        Self::with_view_model(ViewModel::with_title(title), Arc::new(model))
    }

    pub fn with_view_model(view_model: ViewModel, model: Arc<M>) -> Self {
        Self { view_model, model }
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn view_model(&self) -> &ViewModel {
        &self.view_model
    }
}

impl<M: Saveable> ModelViewModel<M> {
    /// Save the model; enabled iff the view model is not loading.
    pub fn create_save_action(&self) -> Action<M::SaveInput, M, M::SaveError> {
        let model = Arc::clone(&self.model);
        self.view_model
            .create_action(move |input| Arc::clone(&model).save(input))
    }
}

impl<M: Fetchable> ModelViewModel<M> {
    /// Fetch the model; enabled iff the view model is not loading.
    pub fn create_fetch_action(&self) -> Action<M::FetchInput, M, M::FetchError> {
        let model = Arc::clone(&self.model);
        self.view_model
            .create_action(move |input| Arc::clone(&model).fetch(input))
    }
}

impl<M: Deletable> ModelViewModel<M> {
    /// Delete the model; enabled iff the view model is not loading.
    pub fn create_delete_action(&self) -> Action<M::DeleteInput, M, M::DeleteError> {
        let model = Arc::clone(&self.model);
        self.view_model
            .create_action(move |input| Arc::clone(&model).delete(input))
    }
}
