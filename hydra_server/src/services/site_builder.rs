//! Runs the configured static-site build command.

use std::path::Path;
use std::sync::Arc;

use crate::error::CommandError;
use crate::services::process_runner::CommandRunner;

pub struct SiteBuilder {
    template: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl SiteBuilder {
    /// `template` may use `{source}` and `{output}` in any argument.
    pub fn new(template: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { template, runner }
    }

    pub fn command_for(&self, source: &Path, output: &Path) -> Vec<String> {
        let source = source.to_string_lossy();
        let output = output.to_string_lossy();
        self.template
            .iter()
            .map(|arg| arg.replace("{source}", &source).replace("{output}", &output))
            .collect()
    }

    /// Build `source` into `output`, with `source` as the working directory.
    pub async fn build(&self, source: &Path, output: &Path) -> Result<(), CommandError> {
        let argv = self.command_for(source, output);
        self.runner.run(&argv, source).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;

    struct NeverRun;

    #[async_trait]
    impl CommandRunner for NeverRun {
        async fn run(&self, _argv: &[String], _cwd: &Path) -> Result<(), CommandError> {
            unreachable!("command_for must not run anything")
        }
    }

    #[test]
    fn substitutes_source_and_output() {
        let builder = SiteBuilder::new(
            vec![
                "jekyll".to_string(),
                "build".to_string(),
                "-s".to_string(),
                "{source}".to_string(),
                "--destination={output}".to_string(),
            ],
            Arc::new(NeverRun),
        );
        let argv = builder.command_for(&PathBuf::from("/tmp/x/repo"), &PathBuf::from("/srv/out"));
        assert_eq!(
            argv,
            vec!["jekyll", "build", "-s", "/tmp/x/repo", "--destination=/srv/out"]
        );
    }
}
