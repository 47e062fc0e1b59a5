use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Settings;

/// `pdf-parser` TOML config. Every field is optional; unset values fall
/// through to the next layer and finally to [`Settings::default`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub grobid: Option<GrobidConfig>,
    pub scienceparse: Option<ScienceParseConfig>,
    pub java: Option<JavaConfig>,
    pub pdffigures: Option<PdfFiguresConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrobidConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub sleep_secs: Option<u64>,
    pub max_busy_retries: Option<u32>,
    pub coordinates: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScienceParseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub write_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JavaConfig {
    pub java: Option<String>,
    pub cermine_jar: Option<String>,
    pub pdffigures2_jar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfFiguresConfig {
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub threads: Option<usize>,
    pub probe_timeout_secs: Option<u64>,
    pub scratch_dir: Option<String>,
}

/// Platform config directory path: `<config_dir>/pdf-parser/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pdf-parser").join("config.toml"))
}

/// `./.pdf-parser.toml` layered over the platform config file.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".pdf-parser.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// `None` when `path` is missing or not valid TOML.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// Build a config layer from environment variables, looked up through
/// `var` (usually `std::env::var(name).ok()`). Unparsable ports are
/// ignored.
pub fn from_env(var: impl Fn(&str) -> Option<String>) -> ConfigFile {
    let port = |name: &str| var(name).and_then(|v| v.trim().parse::<u16>().ok());
    let grobid = GrobidConfig {
        host: var("GROBID_HOST"),
        port: port("GROBID_PORT"),
        ..Default::default()
    };
    let scienceparse = ScienceParseConfig {
        host: var("SCIENCEPARSE_HOST"),
        port: port("SCIENCEPARSE_PORT"),
        ..Default::default()
    };
    let java = JavaConfig {
        java: var("PDF_PARSER_JAVA"),
        cermine_jar: var("CERMINE_JAR"),
        pdffigures2_jar: var("PDFFIGURES2_JAR"),
    };
    let pdffigures = PdfFiguresConfig {
        binary: var("PDFFIGURES_BIN"),
    };
    ConfigFile {
        grobid: Some(grobid),
        scienceparse: Some(scienceparse),
        java: Some(java),
        pdffigures: Some(pdffigures),
        concurrency: None,
    }
}

fn pick<S, T>(
    overlay: &Option<S>,
    base: &Option<S>,
    field: impl Fn(&S) -> Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Field-wise merge where `overlay` wins.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (b, o) = (&base, &overlay);
    ConfigFile {
        grobid: Some(GrobidConfig {
            host: pick(&o.grobid, &b.grobid, |g| g.host.clone()),
            port: pick(&o.grobid, &b.grobid, |g| g.port),
            sleep_secs: pick(&o.grobid, &b.grobid, |g| g.sleep_secs),
            max_busy_retries: pick(&o.grobid, &b.grobid, |g| g.max_busy_retries),
            coordinates: pick(&o.grobid, &b.grobid, |g| g.coordinates.clone()),
        }),
        scienceparse: Some(ScienceParseConfig {
            host: pick(&o.scienceparse, &b.scienceparse, |s| s.host.clone()),
            port: pick(&o.scienceparse, &b.scienceparse, |s| s.port),
            write_retries: pick(&o.scienceparse, &b.scienceparse, |s| s.write_retries),
        }),
        java: Some(JavaConfig {
            java: pick(&o.java, &b.java, |j| j.java.clone()),
            cermine_jar: pick(&o.java, &b.java, |j| j.cermine_jar.clone()),
            pdffigures2_jar: pick(&o.java, &b.java, |j| j.pdffigures2_jar.clone()),
        }),
        pdffigures: Some(PdfFiguresConfig {
            binary: pick(&o.pdffigures, &b.pdffigures, |p| p.binary.clone()),
        }),
        concurrency: Some(ConcurrencyConfig {
            threads: pick(&o.concurrency, &b.concurrency, |c| c.threads),
            probe_timeout_secs: pick(&o.concurrency, &b.concurrency, |c| c.probe_timeout_secs),
            scratch_dir: pick(&o.concurrency, &b.concurrency, |c| c.scratch_dir.clone()),
        }),
    }
}

impl ConfigFile {
    /// Write every value this config sets into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(g) = &self.grobid {
            if let Some(host) = &g.host {
                settings.grobid.host = host.clone();
            }
            if let Some(port) = g.port {
                settings.grobid.port = port;
            }
            if let Some(secs) = g.sleep_secs {
                settings.grobid.sleep = Duration::from_secs(secs);
            }
            if g.max_busy_retries.is_some() {
                settings.grobid.max_busy_retries = g.max_busy_retries;
            }
            if let Some(coordinates) = &g.coordinates {
                settings.grobid.coordinates = coordinates.clone();
            }
        }
        if let Some(s) = &self.scienceparse {
            if let Some(host) = &s.host {
                settings.scienceparse.host = host.clone();
            }
            if let Some(port) = s.port {
                settings.scienceparse.port = port;
            }
            if let Some(retries) = s.write_retries {
                settings.scienceparse.write_retries = retries;
            }
        }
        if let Some(j) = &self.java {
            if let Some(java) = &j.java {
                settings.java.java = PathBuf::from(java);
            }
            if let Some(jar) = &j.cermine_jar {
                settings.java.cermine_jar = PathBuf::from(jar);
            }
            if let Some(jar) = &j.pdffigures2_jar {
                settings.java.pdffigures2_jar = PathBuf::from(jar);
            }
        }
        if let Some(binary) = self.pdffigures.as_ref().and_then(|p| p.binary.as_ref()) {
            settings.pdffigures.binary = PathBuf::from(binary);
        }
        if let Some(c) = &self.concurrency {
            if let Some(secs) = c.probe_timeout_secs {
                settings.probe_timeout = Duration::from_secs(secs);
            }
            if let Some(dir) = &c.scratch_dir {
                settings.scratch_root = Some(PathBuf::from(dir));
            }
        }
    }

    /// Configured worker count, if any.
    pub fn threads(&self) -> Option<usize> {
        self.concurrency.as_ref().and_then(|c| c.threads)
    }
}
