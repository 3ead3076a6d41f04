//! Search and fetch backend driving the `yt-dlp` executable.
//!
//! `yt-dlp` needs `ffmpeg` on the PATH for the MP3 extraction step.

use crate::source::{BackendError, Codec, FetchBackend, SearchBackend};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Output, Stdio};

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// One line of `--dump-json --flat-playlist` output.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    webpage_url: Option<String>,
    url: Option<String>,
}

/// Locators from line-delimited JSON, in output order. Lines that are not
/// JSON objects are skipped.
pub fn parse_search_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<SearchEntry>(line).ok())
        .filter_map(|entry| {
            entry
                .webpage_url
                .filter(|u| !u.is_empty())
                .or(entry.url.filter(|u| !u.is_empty()))
        })
        .collect()
}

/// `--audio-quality` value: bitrates get a `K` suffix, VBR levels (0-10) and
/// anything already suffixed pass through.
pub fn audio_quality_arg(quality: &str) -> String {
    let quality = quality.trim();
    match quality.parse::<u32>() {
        Ok(n) if n > 10 => format!("{n}K"),
        _ => quality.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, BackendError> {
        tracing::debug!("Running {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BackendError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl SearchBackend for YtDlp {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, BackendError> {
        let search = format!("ytsearch{}:{}", limit.max(1), query);
        let output = self.run(&["--dump-json", "--flat-playlist", "--no-warnings", &search])?;
        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| BackendError::InvalidOutput(format!("non UTF-8 search output: {e}")))?;
        Ok(parse_search_output(&stdout))
    }
}

impl FetchBackend for YtDlp {
    fn fetch_and_transcode(
        &self,
        locator: &str,
        target_stem: &Path,
        codec: Codec,
        quality: &str,
    ) -> Result<(), BackendError> {
        let template = format!("{}.%(ext)s", target_stem.display());
        let quality = audio_quality_arg(quality);
        self.run(&[
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            codec.as_str(),
            "--audio-quality",
            &quality,
            "-o",
            &template,
            "--quiet",
            "--no-warnings",
            "--no-playlist",
            locator,
        ])?;
        Ok(())
    }
}
