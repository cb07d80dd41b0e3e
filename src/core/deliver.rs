use crate::domain::ports::DeliveryStage;
use crate::utils::error::{Result, SheetError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Multiple of 3 so every chunk encodes without padding except the last.
const DATA_URL_CHUNK: usize = 3 * 1024;

#[derive(Debug)]
pub struct DeliveryOutcome {
    pub stage: &'static str,
    pub location: PathBuf,
}

/// Writes to the path the user asked for.
pub struct OutputPathStage {
    pub path: PathBuf,
}

impl DeliveryStage for OutputPathStage {
    fn name(&self) -> &'static str {
        "output-path"
    }

    fn deliver(&self, _filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, bytes)?;
        Ok(self.path.clone())
    }
}

/// Falls back to the user's downloads directory.
pub struct DownloadsDirStage;

impl DeliveryStage for DownloadsDirStage {
    fn name(&self) -> &'static str {
        "downloads-dir"
    }

    fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let home = std::env::var_os("HOME").ok_or_else(|| SheetError::Config {
            message: "HOME is not set".to_string(),
        })?;
        let dir = Path::new(&home).join("Downloads");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(filename);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Falls back to the system temp directory.
pub struct TempDirStage;

impl DeliveryStage for TempDirStage {
    fn name(&self) -> &'static str {
        "temp-dir"
    }

    fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = std::env::temp_dir().join(filename);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Last resort: dump a base64 data URL to stdout, encoded in chunks so
/// huge documents never build one giant intermediate string.
pub struct DataUrlStage;

impl DeliveryStage for DataUrlStage {
    fn name(&self) -> &'static str {
        "data-url"
    }

    fn deliver(&self, _filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        write_data_url(&mut out, bytes)?;
        Ok(PathBuf::from("<stdout>"))
    }
}

pub fn write_data_url<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    out.write_all(b"data:application/pdf;base64,")?;
    for chunk in bytes.chunks(DATA_URL_CHUNK) {
        out.write_all(STANDARD.encode(chunk).as_bytes())?;
    }
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

pub fn default_stages(output: &Path) -> Vec<Box<dyn DeliveryStage>> {
    vec![
        Box::new(OutputPathStage {
            path: output.to_path_buf(),
        }),
        Box::new(DownloadsDirStage),
        Box::new(TempDirStage),
        Box::new(DataUrlStage),
    ]
}

/// Tries each stage in order. Any stage's failure falls through to the
/// next; only exhausting the whole cascade is reported as failure.
pub fn deliver(
    bytes: &[u8],
    filename: &str,
    stages: &[Box<dyn DeliveryStage>],
) -> Result<DeliveryOutcome> {
    for stage in stages {
        match stage.deliver(filename, bytes) {
            Ok(location) => {
                tracing::info!("💾 delivered via {}: {}", stage.name(), location.display());
                return Ok(DeliveryOutcome {
                    stage: stage.name(),
                    location,
                });
            }
            Err(e) => {
                tracing::warn!("delivery stage {} failed: {}", stage.name(), e);
            }
        }
    }
    Err(SheetError::Unknown {
        message: "every delivery mechanism failed".to_string(),
    })
}
