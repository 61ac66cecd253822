use crate::image::toc::{TocFile, TocParser};
use crate::task::error::{TaskError, TaskResult};
use crate::task::popen::{Exit, PopenTask, ProcessHandler, Stream};
use crate::task::{TaskCore, TaskListener};
use log::{debug, error};
use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CDRDAO: &str = "cdrdao";

const UNIT_NOT_READY: &str = "ERROR: Unit not ready, giving up.";

/// `cdrdao read-toc` writing the disc's table of contents to a file that is
/// parsed once it finishes.
#[derive(Debug)]
pub struct ReadToc {
    device: String,
    // cdrdao refuses to overwrite, so the file must not exist yet
    dir: TempDir,
    no_disc: bool,
    toc: Option<TocFile>,
}

pub type ReadTocTask = PopenTask<ReadToc>;

impl ReadToc {
    pub fn new(device: impl Into<String>) -> TaskResult<Self> {
        let dir = tempfile::Builder::new().prefix("cdrip-toc-").tempdir()?;
        Ok(Self {
            device: device.into(),
            dir,
            no_disc: false,
            toc: None,
        })
    }

    /// Fast mode skips scanning for pregaps and index marks.
    pub fn task(device: &str, fast_toc: bool) -> TaskResult<ReadTocTask> {
        let handler = ReadToc::new(device)?;

        let mut command: Vec<OsString> = vec![CDRDAO.into(), "read-toc".into()];
        if fast_toc {
            command.push("--fast-toc".into());
        }
        command.push("--device".into());
        command.push(device.into());
        command.push(handler.toc_path().into());

        Ok(PopenTask::new("Reading TOC", command, handler))
    }

    pub fn toc_path(&self) -> PathBuf {
        self.dir.path().join("disc.toc")
    }

    pub fn toc(&self) -> Option<&TocFile> {
        self.toc.as_ref()
    }

    pub fn into_toc(self) -> Option<TocFile> {
        self.toc
    }
}

impl ProcessHandler for ReadToc {
    fn line(
        &mut self,
        stream: Stream,
        line: &str,
        _core: &mut TaskCore,
        _listener: &mut dyn TaskListener,
    ) -> ControlFlow<()> {
        if stream == Stream::Stderr && line.contains(UNIT_NOT_READY) {
            self.no_disc = true;
        }
        ControlFlow::Continue(())
    }

    fn done(&mut self) -> TaskResult<()> {
        let toc_path = self.toc_path();
        let content = std::fs::read(&toc_path)?;
        let toc = TocParser::new(&toc_path).parse_str(&String::from_utf8_lossy(&content));
        debug!("Read TOC with {} tracks", toc.table.tracks.len());

        self.toc = Some(toc);
        Ok(())
    }

    fn failed(&mut self, program: &str, exit: Exit) -> TaskResult<()> {
        error!("{program} read-toc failed with code {:?}", exit.code);
        if self.no_disc {
            return Err(TaskError::NoDisc(self.device.clone()));
        }
        Err(TaskError::ReturnCode {
            program: program.to_string(),
            code: exit.code,
            stderr: exit.stderr,
        })
    }
}

/// Copies the raw TOC next to a rip.
pub async fn save_toc(handler: &ReadToc, destination: &Path) -> TaskResult<()> {
    tokio::fs::copy(handler.toc_path(), destination).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::toc::tests::SAMPLE_TOC;
    use crate::task::{NoListener, drive};

    fn fake_cdrdao(script: impl FnOnce(&Path) -> String) -> ReadTocTask {
        let handler = ReadToc::new("/dev/sr0").unwrap();
        let script = script(&handler.toc_path());
        PopenTask::new("Reading TOC", ["sh".to_string(), "-c".to_string(), script], handler)
    }

    #[test]
    fn read_toc_arguments() {
        let task = ReadToc::task("/dev/sr0", true).unwrap();
        let toc_path = task.handler().toc_path();
        assert!(!toc_path.exists());

        let args: Vec<_> = task.command().iter().map(|arg| arg.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "cdrdao".to_string(),
                "read-toc".to_string(),
                "--fast-toc".to_string(),
                "--device".to_string(),
                "/dev/sr0".to_string(),
                toc_path.to_string_lossy().into_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn parses_written_toc() {
        let mut task = fake_cdrdao(|path| {
            format!("cat > '{}' <<'EOF'\n{SAMPLE_TOC}EOF\n", path.display())
        });

        drive(&mut task, &mut NoListener).await.unwrap();
        let toc = task.into_handler().into_toc().unwrap();
        assert_eq!(toc.table.tracks.len(), 3);
        assert_eq!(toc.table.catalog.as_deref(), Some("0602517642256"));
    }

    #[tokio::test]
    async fn unit_not_ready_means_no_disc() {
        let mut task = fake_cdrdao(|_| format!("echo '{UNIT_NOT_READY}' >&2; exit 1"));

        assert!(matches!(
            drive(&mut task, &mut NoListener).await,
            Err(TaskError::NoDisc(device)) if device == "/dev/sr0"
        ));
    }

    #[tokio::test]
    async fn other_failures_keep_stderr() {
        let mut task = fake_cdrdao(|_| "echo 'ERROR: Cannot setup device' >&2; exit 1".to_string());

        match drive(&mut task, &mut NoListener).await {
            Err(TaskError::ReturnCode { code, stderr, .. }) => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "ERROR: Cannot setup device");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn saves_raw_toc() {
        let mut task = fake_cdrdao(|path| format!("echo 'CD_DA' > '{}'", path.display()));
        drive(&mut task, &mut NoListener).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("disc.toc");
        save_toc(task.handler(), &destination).await.unwrap();
        assert_eq!(std::fs::read_to_string(destination).unwrap(), "CD_DA\n");
    }
}
