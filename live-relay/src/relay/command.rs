//! Relay command construction.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::StreamKey;

pub const DEFAULT_INGEST_BASE_URL: &str = "rtmp://a.rtmp.youtube.com/live2";

/// How the relay binary is located and where it publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    pub binary_path: String,
    /// Arguments placed before the relay arguments, e.g. for a wrapper binary.
    pub launcher_args: Vec<String>,
    pub ingest_base_url: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            launcher_args: Vec::new(),
            ingest_base_url: DEFAULT_INGEST_BASE_URL.to_string(),
        }
    }
}

/// Per-job inputs to [`build_invocation`].
#[derive(Debug, Clone, Copy)]
pub struct RelayPlan<'a> {
    pub input: &'a Path,
    pub stream_key: &'a StreamKey,
    pub loop_forever: bool,
    /// Stop after this many seconds. Takes precedence over looping.
    pub duration_secs: Option<u64>,
}

/// A program and argument vector ready to spawn. Never passed through a shell.
#[derive(Clone)]
pub struct RelayInvocation {
    pub program: String,
    pub args: Vec<String>,
    stream_key: StreamKey,
}

impl RelayInvocation {
    /// Command line with the stream key masked, for logs.
    pub fn display_redacted(&self) -> String {
        let line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.stream_key.redact(&line)
    }
}

impl fmt::Debug for RelayInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayInvocation")
            .field("command", &self.display_redacted())
            .finish()
    }
}

pub fn build_invocation(config: &FfmpegConfig, plan: &RelayPlan<'_>) -> RelayInvocation {
    let mut args = config.launcher_args.clone();
    args.extend(["-hide_banner".to_string(), "-re".to_string()]);

    if plan.loop_forever && plan.duration_secs.is_none() {
        args.extend(["-stream_loop".to_string(), "-1".to_string()]);
    }

    args.extend([
        "-i".to_string(),
        plan.input.to_string_lossy().into_owned(),
    ]);

    if let Some(secs) = plan.duration_secs {
        args.extend(["-t".to_string(), secs.to_string()]);
    }

    args.extend(
        ["-c:v", "copy", "-c:a", "copy", "-f", "flv"]
            .into_iter()
            .map(String::from),
    );
    args.push(format!(
        "{}/{}",
        config.ingest_base_url.trim_end_matches('/'),
        plan.stream_key.expose()
    ));

    RelayInvocation {
        program: config.binary_path.clone(),
        args,
        stream_key: plan.stream_key.clone(),
    }
}

/// Whole seconds from `now` until `ends_at`, rounded to nearest.
///
/// `None` when the end has already passed or rounds to zero.
pub fn duration_until(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    let millis = (ends_at - now).num_milliseconds();
    if millis <= 0 {
        return None;
    }
    let secs = (millis + 500) / 1000;
    u64::try_from(secs).ok().filter(|s| *s > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::path::PathBuf;

    fn plan<'a>(input: &'a Path, key: &'a StreamKey) -> RelayPlan<'a> {
        RelayPlan {
            input,
            stream_key: key,
            loop_forever: false,
            duration_secs: None,
        }
    }

    #[test]
    fn test_default_command_shape() {
        let input = PathBuf::from("/tmp/staging/relay_1.mp4");
        let key = StreamKey::new("abcd-1234");
        let inv = build_invocation(&FfmpegConfig::default(), &plan(&input, &key));

        assert_eq!(inv.program, "ffmpeg");
        assert_eq!(
            inv.args,
            vec![
                "-hide_banner",
                "-re",
                "-i",
                "/tmp/staging/relay_1.mp4",
                "-c:v",
                "copy",
                "-c:a",
                "copy",
                "-f",
                "flv",
                "rtmp://a.rtmp.youtube.com/live2/abcd-1234",
            ]
        );
    }

    #[test]
    fn test_loop_only_without_duration() {
        let input = PathBuf::from("in.mp4");
        let key = StreamKey::new("k");
        let mut p = plan(&input, &key);
        p.loop_forever = true;

        let looped = build_invocation(&FfmpegConfig::default(), &p);
        assert!(looped.args.windows(2).any(|w| w == ["-stream_loop", "-1"]));

        p.duration_secs = Some(90);
        let timed = build_invocation(&FfmpegConfig::default(), &p);
        assert!(!timed.args.iter().any(|a| a == "-stream_loop"));
        assert!(timed.args.windows(2).any(|w| w == ["-t", "90"]));
    }

    #[test]
    fn test_launcher_args_and_ingest_base() {
        let input = PathBuf::from("in.mp4");
        let key = StreamKey::new("secret-key");
        let config = FfmpegConfig {
            binary_path: "/bin/sh".into(),
            launcher_args: vec!["-c".into(), "exit 0".into(), "relay".into()],
            ingest_base_url: "rtmp://ingest.local/live2/".into(),
        };
        let inv = build_invocation(&config, &plan(&input, &key));

        assert_eq!(&inv.args[..3], ["-c", "exit 0", "relay"]);
        assert_eq!(
            inv.args.last().map(String::as_str),
            Some("rtmp://ingest.local/live2/secret-key")
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let input = PathBuf::from("in.mp4");
        let key = StreamKey::new("very-secret-key");
        let inv = build_invocation(&FfmpegConfig::default(), &plan(&input, &key));

        assert!(!format!("{inv:?}").contains("very-secret-key"));
        assert!(!inv.display_redacted().contains("very-secret-key"));
    }

    #[test]
    fn test_duration_rounding() {
        let now = Utc::now();
        assert_eq!(duration_until(now + Duration::milliseconds(90_400), now), Some(90));
        assert_eq!(duration_until(now + Duration::milliseconds(90_500), now), Some(91));
        assert_eq!(duration_until(now + Duration::milliseconds(400), now), None);
        assert_eq!(duration_until(now, now), None);
        assert_eq!(duration_until(now - Duration::seconds(5), now), None);
    }
}
