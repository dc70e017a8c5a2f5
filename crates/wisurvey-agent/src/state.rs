//! Shared application state.

use std::sync::Arc;

use wisurvey_core::SurveyService;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<SurveyService>,
}

impl AppState {
    pub fn new(service: SurveyService) -> Self {
        Self {
            inner: Arc::new(service),
        }
    }

    pub fn service(&self) -> &SurveyService {
        &self.inner
    }
}
