use crate::task::error::{TaskError, TaskResult};
use crate::task::popen::{PopenTask, ProcessHandler, Stream};
use crate::task::{TaskCore, TaskListener};
use log::debug;
use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::Path;

pub const SOX: &str = "sox";

/// Peak sample level reported by `sox … -n stats`, from 0 to 1.
#[derive(Debug, Default)]
pub struct PeakLevel {
    min_level: Option<f64>,
    max_level: Option<f64>,
    peak: Option<f64>,
}

pub type PeakLevelTask = PopenTask<PeakLevel>;

impl PeakLevel {
    pub fn task(path: &Path) -> PeakLevelTask {
        let command: Vec<OsString> = vec![SOX.into(), path.into(), "-n".into(), "stats".into()];
        PopenTask::new("Calculating peak level", command, PeakLevel::default())
    }

    pub fn peak(&self) -> Option<f64> {
        self.peak
    }
}

fn level(line: &str, name: &str) -> Option<f64> {
    line.strip_prefix(name)?.split_whitespace().next()?.parse().ok()
}

impl ProcessHandler for PeakLevel {
    fn line(
        &mut self,
        stream: Stream,
        line: &str,
        _core: &mut TaskCore,
        _listener: &mut dyn TaskListener,
    ) -> ControlFlow<()> {
        if stream == Stream::Stderr {
            if let Some(value) = level(line, "Min level") {
                self.min_level = Some(value);
            } else if let Some(value) = level(line, "Max level") {
                self.max_level = Some(value);
            }
        }
        ControlFlow::Continue(())
    }

    fn done(&mut self) -> TaskResult<()> {
        match (self.min_level, self.max_level) {
            (Some(min), Some(max)) => {
                let peak = min.abs().max(max.abs());
                debug!("Peak level {peak}");
                self.peak = Some(peak);
                Ok(())
            }
            _ => Err(TaskError::UnexpectedOutput {
                program: SOX.to_string(),
                message: "no Min level/Max level in stats".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NoListener, drive};

    const STATS: &str = "\
DC offset   0.000011
Min level  -0.800018
Max level   0.625000
Pk lev dB      -1.94
RMS lev dB    -13.02
Length s   12.000";

    fn sh(script: String) -> PeakLevelTask {
        PopenTask::new("Calculating peak level", ["sh".to_string(), "-c".to_string(), script], PeakLevel::default())
    }

    #[test]
    fn stats_arguments() {
        let task = PeakLevel::task(Path::new("track.wav"));
        let args: Vec<_> = task.command().iter().map(|arg| arg.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["sox", "track.wav", "-n", "stats"]);
    }

    #[tokio::test]
    async fn peak_is_largest_absolute_level() {
        let mut task = sh(format!("printf '{}\\n' >&2", STATS.replace('\n', "\\n")));

        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(task.handler().peak(), Some(0.800018));
    }

    #[tokio::test]
    async fn silence_has_zero_peak() {
        let mut task = sh("printf 'Min level 0.000000\\nMax level 0.000000\\n' >&2".to_string());

        drive(&mut task, &mut NoListener).await.unwrap();
        assert_eq!(task.handler().peak(), Some(0.0));
    }

    #[tokio::test]
    async fn missing_levels_are_an_error() {
        let mut task = sh("echo 'sox FAIL formats' >&2".to_string());

        assert!(matches!(
            drive(&mut task, &mut NoListener).await,
            Err(TaskError::UnexpectedOutput { .. })
        ));
    }
}
