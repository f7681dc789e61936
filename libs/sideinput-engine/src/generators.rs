use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use sideinput_api::{SideInputError, SideInputGenerator};

// ════════════════════════════════════════════════════════════════
//  CommandGenerator
// ════════════════════════════════════════════════════════════════

/// Значение — stdout внешней программы.
///
/// Ненулевой код выхода или таймаут — ошибка генерации; процесс
/// убивается, если не уложился в таймаут.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self) -> Result<Vec<u8>, SideInputError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SideInputError::generation(format!("spawn '{}': {e}", self.program)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                SideInputError::generation(format!(
                    "'{}' timed out after {} ms",
                    self.program,
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| SideInputError::generation(format!("wait '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SideInputError::generation(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl SideInputGenerator for CommandGenerator {
    fn produce(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, SideInputError>> + Send + '_>> {
        Box::pin(self.run())
    }
}

// ════════════════════════════════════════════════════════════════
//  FileGenerator
// ════════════════════════════════════════════════════════════════

/// Значение — содержимое файла, перечитывается на каждом тике.
#[derive(Debug, Clone)]
pub struct FileGenerator {
    path: PathBuf,
}

impl FileGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SideInputGenerator for FileGenerator {
    fn produce(&self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, SideInputError>> + Send + '_>> {
        Box::pin(async move {
            tokio::fs::read(&self.path)
                .await
                .map_err(|e| SideInputError::generation(format!("read {}: {e}", self.path.display())))
        })
    }
}
