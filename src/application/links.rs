//! Absolute URLs for stored artifacts.

use markmap_api_types::ArtifactLink;
use url::Url;

use crate::domain::artifacts::ArtifactKind;

#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: Url,
}

impl LinkBuilder {
    pub fn new(public_url: &Url) -> Self {
        let mut base = public_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Self { base }
    }

    /// `/artifacts/{base}/raw/{type}` for one file of a set.
    pub fn raw(&self, base_name: &str, kind: ArtifactKind) -> String {
        self.join(&format!("artifacts/{base_name}/raw/{}", kind.extension()))
    }

    /// `/html/{file}`, the preview route kept for older clients.
    pub fn preview(&self, file_name: &str) -> String {
        self.join(&format!("html/{file_name}"))
    }

    pub fn link(&self, base_name: &str, kind: ArtifactKind) -> ArtifactLink {
        ArtifactLink {
            file_name: kind.file_name(base_name),
            url: self.raw(base_name, kind),
        }
    }

    fn join(&self, relative: &str) -> String {
        self.base
            .join(relative)
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{relative}", self.base))
    }
}
