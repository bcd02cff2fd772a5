//! Markup conversion through an external `pandoc` process

use std::process::Stdio;

use rmigrate_core::hierarchy::{ConvertError, MarkupConverter};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone, clap::Args)]
pub struct PandocConfig {
    /// Path to the pandoc binary
    #[arg(long = "pandoc-bin", env = "PANDOC_BIN", default_value = "pandoc")]
    pub bin: String,
}

/// One pandoc invocation per conversion, source on stdin and result on stdout
#[derive(Debug, Clone)]
pub struct Pandoc {
    bin: String,
    from: &'static str,
    to: &'static str,
}

impl Pandoc {
    pub fn new(bin: impl Into<String>, from: &'static str, to: &'static str) -> Self {
        Self {
            bin: bin.into(),
            from,
            to,
        }
    }

    /// Wiki bodies for Confluence storage format
    pub fn textile_to_html(config: &PandocConfig) -> Self {
        Self::new(&config.bin, "textile", "html")
    }

    /// Issue descriptions for the Jira ADF paragraphs
    pub fn textile_to_markdown(config: &PandocConfig) -> Self {
        Self::new(&config.bin, "textile", "markdown")
    }

    fn args(&self) -> [String; 2] {
        [format!("--from={}", self.from), format!("--to={}", self.to)]
    }
}

impl MarkupConverter for Pandoc {
    async fn convert(&self, source: &str) -> Result<String, ConvertError> {
        log::debug!("{} {}", self.bin, self.args().join(" "));

        let mut child = Command::new(&self.bin)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConvertError(format!("failed to start {}: {e}", self.bin)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .await
                .map_err(|e| ConvertError(format!("failed to write to {}: {e}", self.bin)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ConvertError(format!("failed to wait for {}: {e}", self.bin)))?;

        if !output.status.success() {
            return Err(ConvertError(format!(
                "{} failed ({}): {}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| ConvertError(format!("{} produced invalid UTF-8: {e}", self.bin)))
    }
}
