//! HTML views. Templates are plain HTML files with a single `{{ model }}`
//! slot that receives the page data as JSON.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::state::AppState;

pub const MODEL_SLOT: &str = "{{ model }}";

/// Where view templates come from. Retrieval failures are logged and yield an
/// empty template.
#[async_trait]
pub trait ViewSource: Send + Sync {
    async fn get_view(&self, name: &str) -> String;
}

/// Reads `<root>/<name>.html`.
pub struct FsViewSource {
    root: PathBuf,
}

impl FsViewSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ViewSource for FsViewSource {
    async fn get_view(&self, name: &str) -> String {
        // View names are fixed in code, but keep lookups inside the root anyway.
        if name.contains(['/', '\\']) || name.contains("..") {
            error!(view = name, "refusing view name outside views directory");
            return String::new();
        }
        let path = self.root.join(format!("{name}.html"));
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(e) => {
                error!(error = %e, view = name, path = %path.display(), "couldn't get the view");
                String::new()
            }
        }
    }
}

#[derive(Clone)]
pub struct Views {
    source: Arc<dyn ViewSource>,
}

impl Views {
    pub fn new(source: Arc<dyn ViewSource>) -> Self {
        Self { source }
    }

    pub async fn render<T: Serialize + ?Sized>(&self, name: &str, data: Option<&T>) -> Html<String> {
        let template = self.source.get_view(name).await;
        let model = match data.map(serde_json::to_string).transpose() {
            Ok(Some(json)) => json,
            Ok(None) => "null".to_string(),
            Err(e) => {
                error!(error = %e, view = name, "view data not serializable");
                "null".to_string()
            }
        };
        Html(fill_model(&template, &model))
    }
}

/// Inserts `model` into the template. `<` is escaped so the JSON cannot close
/// a surrounding `<script>` element.
pub fn fill_model(template: &str, model: &str) -> String {
    template.replace(MODEL_SLOT, &model.replace('<', "\\u003c"))
}

/// The login view, shown whenever a request lacks a valid bearer token.
pub async fn login_page(state: &AppState) -> Response {
    let page = state.views.render::<()>("login", None).await;
    (StatusCode::UNAUTHORIZED, page).into_response()
}
