use bar_core::{Module, Output, Segment, Sink};
use bar_fswatch::FileWatcher;
use futures::future::BoxFuture;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Shows the first line of a file and follows it as it changes, appears
/// or disappears.
#[derive(Debug, Clone)]
pub struct FileModule {
    path: PathBuf,
}

impl FileModule {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Module for FileModule {
    fn stream(&self, sink: Sink) -> BoxFuture<'static, anyhow::Result<()>> {
        let path = self.path.clone();
        Box::pin(async move {
            let mut watcher = FileWatcher::watch(&path)?;
            loop {
                sink.output(render(&path));
                match watcher.next().await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        warn!(path = %path.display(), "file watcher failed: {e}");
                        return Err(anyhow::Error::new(e).context(format!("watching {}", path.display())));
                    }
                    None => return Ok(()),
                }
            }
        })
    }
}

fn render(path: &Path) -> Output {
    match std::fs::read_to_string(path) {
        Ok(content) => match content.lines().next() {
            Some(line) if !line.trim().is_empty() => Segment::text(line.trim_end()).into(),
            _ => Output::Empty,
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Output::Empty,
        Err(e) => Output::error(anyhow::Error::new(e).context(format!("reading {}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bar_core::Value;
    use std::fs;
    use std::time::{Duration, UNIX_EPOCH};

    fn text(value: &Value<Output>) -> Option<String> {
        let segs = value.get().materialize(UNIX_EPOCH);
        segs.first().map(|s| s.content().as_str().to_string())
    }

    async fn wait_for(value: &Value<Output>, want: Option<&str>) {
        for _ in 0..400 {
            if text(value).as_deref() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("wanted {want:?}, still showing {:?}", text(value));
    }

    #[test]
    fn first_line_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        assert!(render(&path).materialize(UNIX_EPOCH).is_empty());

        fs::write(&path, "playing  \nnext track\n").unwrap();
        let segs = render(&path).materialize(UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "playing");

        fs::write(&path, "\n").unwrap();
        assert!(render(&path).materialize(UNIX_EPOCH).is_empty());
    }

    #[tokio::test]
    async fn follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("status");
        let (sink, value) = Sink::recording();
        let task = tokio::spawn(FileModule::new(&path).stream(sink));
        wait_for(&value, None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(&path, "hello\n").unwrap();
        wait_for(&value, Some("hello")).await;

        fs::write(&path, "bye\n").unwrap();
        wait_for(&value, Some("bye")).await;

        fs::remove_file(&path).unwrap();
        wait_for(&value, None).await;
        task.abort();
    }

    #[tokio::test]
    async fn watcher_errors_fail_the_module() {
        let (sink, _value) = Sink::recording();
        let result = FileModule::new("/").stream(sink).await;
        assert!(result.is_err());
    }
}
