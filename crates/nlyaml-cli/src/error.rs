//! Failure reporting: a failed run records the phase it died in, and the
//! phase fixes both the process exit code and the diagnostic headline.

use std::fmt::Write;

/// The stage a run can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading input or writing output.
    Io,
    /// Transcoding a capture into a document.
    Decode,
    /// Shaping a document into a message.
    Encode,
}

impl Phase {
    const fn label(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Decode => "decode",
            Self::Encode => "encode",
        }
    }
}

/// A failed run: the phase plus the error chain that ended it.
#[derive(Debug)]
pub struct Failure {
    phase: Phase,
    error: anyhow::Error,
}

impl Failure {
    /// An input/output failure.
    pub fn io(error: anyhow::Error) -> Self {
        Self { phase: Phase::Io, error }
    }

    /// A decode failure.
    pub fn decode(error: anyhow::Error) -> Self {
        Self { phase: Phase::Decode, error }
    }

    /// An encode failure.
    pub fn encode(error: anyhow::Error) -> Self {
        Self { phase: Phase::Encode, error }
    }

    /// The process exit code for this failure.
    pub const fn exit_code(&self) -> i32 {
        match self.phase {
            Phase::Decode => 1,
            Phase::Encode => 2,
            Phase::Io => 3,
        }
    }

    /// Render the failure for stderr.
    ///
    /// The deepest cause is what the user has to act on, so it goes on the
    /// headline; the wrapping contexts follow as `while:` lines, outermost
    /// first, tracing the path back out.
    pub fn render(&self, use_color: bool) -> String {
        let chain: Vec<String> = self.error.chain().map(ToString::to_string).collect();
        let root = chain.last().map_or("unknown error", String::as_str);

        let mut out = String::new();
        let headline = format!("nly: {} error", self.phase.label());
        if use_color {
            use colored::Colorize;
            let _ = write!(out, "{}", headline.red().bold());
        } else {
            out.push_str(&headline);
        }
        let _ = writeln!(out, ": {root}");

        for step in &chain[..chain.len().saturating_sub(1)] {
            if use_color {
                use colored::Colorize;
                let _ = writeln!(out, "  {} {}", "while:".dimmed(), step.dimmed());
            } else {
                let _ = writeln!(out, "  while: {step}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn exit_codes_follow_the_phase() {
        assert_eq!(Failure::decode(anyhow!("x")).exit_code(), 1);
        assert_eq!(Failure::encode(anyhow!("x")).exit_code(), 2);
        assert_eq!(Failure::io(anyhow!("x")).exit_code(), 3);
    }

    #[test]
    fn headline_carries_the_deepest_cause() {
        let err = anyhow!("connection reset")
            .context("receiving from the kernel")
            .context("reading capture.bin");
        let text = Failure::decode(err).render(false);
        assert!(text.starts_with("nly: decode error: connection reset\n"));
    }

    #[test]
    fn contexts_follow_outermost_first() {
        let err = anyhow!("root").context("inner step").context("outer step");
        let text = Failure::io(err).render(false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "nly: io error: root");
        assert_eq!(lines[1], "  while: outer step");
        assert_eq!(lines[2], "  while: inner step");
    }

    #[test]
    fn plain_rendering_is_stable() {
        let failure = Failure::encode(anyhow!("document names no multicast group"));
        assert_eq!(
            failure.render(false),
            "nly: encode error: document names no multicast group\n"
        );
    }
}
