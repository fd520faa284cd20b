use crate::controller::TriggerController;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: TriggerController,
}

impl AppState {
    pub fn new(controller: TriggerController) -> Self {
        Self { controller }
    }
}
