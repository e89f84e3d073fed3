//! Source-control client: clone and checkout via the git CLI.

use std::path::Path;
use std::sync::Arc;

use crate::error::CommandError;
use crate::services::process_runner::CommandRunner;

pub struct GitClient {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl GitClient {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Clone `url` into `destination`, running from `workdir`.
    pub async fn clone_repo(
        &self,
        url: &str,
        destination: &Path,
        workdir: &Path,
    ) -> Result<(), CommandError> {
        let argv = vec![
            self.program.clone(),
            "clone".to_string(),
            "--".to_string(),
            url.to_string(),
            destination.to_string_lossy().into_owned(),
        ];
        self.runner.run(&argv, workdir).await
    }

    /// Check out `reference` inside the cloned `repo`.
    pub async fn checkout(&self, reference: &str, repo: &Path) -> Result<(), CommandError> {
        let argv = vec![
            self.program.clone(),
            "checkout".to_string(),
            reference.to_string(),
        ];
        self.runner.run(&argv, repo).await
    }
}
