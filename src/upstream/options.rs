//! Transcoder launch options and argument contract

/// Output container forced on the transcoder
pub const OUTPUT_FORMAT: &str = "mpegts";

/// Video codec forced on the transcoder (MPEG1 is what jsmpeg decodes)
pub const VIDEO_CODEC: &str = "mpeg1video";

/// Frame rate forced on the transcoder; lower rates stall the browser decoder
pub const FRAME_RATE: &str = "30";

/// Options used to launch the transcoder for one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Source URL handed to the transcoder as its input
    pub url: String,

    /// Extra arguments inserted before the output target
    pub additional_flags: Vec<String>,

    /// Emit lifecycle logs at info/warn instead of debug
    pub verbose: bool,
}

impl LaunchOptions {
    /// Create options for a source URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Append extra transcoder flags
    pub fn additional_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Enable verbose lifecycle logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the transcoder argument list
    ///
    /// Input, forced container, codec and frame rate come first, then the
    /// caller's flags, then `-` so output goes to stdout.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(9 + self.additional_flags.len());
        args.extend(
            [
                "-i",
                self.url.as_str(),
                "-f",
                OUTPUT_FORMAT,
                "-codec:v",
                VIDEO_CODEC,
                "-r",
                FRAME_RATE,
            ]
            .map(String::from),
        );
        args.extend(self.additional_flags.iter().cloned());
        args.push("-".to_string());
        args
    }
}
