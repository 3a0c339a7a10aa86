//! Server Launch Configuration
//!
//! Resolves where the local ComfyUI checkout lives, which Python
//! interpreter runs it, and how the server binds. Everything is
//! environment-driven with sensible defaults so the bridge works out
//! of the box against a standard checkout.
//!
//! # Environment Variables
//!
//! - `COMFYUI_DIR` - Absolute path to the ComfyUI checkout (required)
//! - `COMFYUI_PYTHON` - Interpreter override (default: tool-local venv, then `python3`)
//! - `COMFYUI_IP` - Bind address (default: `127.0.0.1`)
//! - `COMFYUI_PORT` - Bind port (default: `8188`)
//! - `COMFYUI_FLAGS` - Extra whitespace-separated flags

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use log::{debug, warn};
use thiserror::Error;

/// Environment variable naming the ComfyUI checkout directory.
pub const ENV_DIR: &str = "COMFYUI_DIR";

/// Environment variable overriding the Python interpreter.
pub const ENV_PYTHON: &str = "COMFYUI_PYTHON";

/// Environment variable overriding the bind address.
pub const ENV_IP: &str = "COMFYUI_IP";

/// Environment variable overriding the bind port.
pub const ENV_PORT: &str = "COMFYUI_PORT";

/// Environment variable with extra server flags.
pub const ENV_FLAGS: &str = "COMFYUI_FLAGS";

/// Default bind address.
pub const DEFAULT_IP: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8188;

/// Default extra flags: keep logs on stdout and don't pop a browser.
pub const DEFAULT_FLAGS: &str = "--log-stdout --disable-auto-launch";

/// Entry scripts probed under the checkout root, in priority order.
const ENTRY_CANDIDATES: &[&str] = &["main.py", "server.py"];

/// Interpreter locations probed inside a tool-local virtual environment.
const VENV_INTERPRETERS: &[&str] = &[
    "venv/bin/python",
    ".venv/bin/python",
    "venv/Scripts/python.exe",
    ".venv/Scripts/python.exe",
];

/// Interpreter used when no override and no venv interpreter exists.
const FALLBACK_INTERPRETER: &str = "python3";

/// Errors raised while assembling the server command line.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ComfyUI directory is not configured (set {ENV_DIR})")]
    RootNotSet,

    #[error("ComfyUI directory does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("no entry script found under '{root}' (checked {candidates})")]
    EntryScriptMissing { root: PathBuf, candidates: String },
}

/// Launch configuration for the supervised server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root of the ComfyUI checkout (the directory holding `main.py`).
    pub root_dir: Option<PathBuf>,

    /// Explicit interpreter override. When unset, a tool-local venv
    /// interpreter is preferred, then `python3` from PATH.
    pub interpreter: Option<PathBuf>,

    /// Address the server binds to.
    pub bind_ip: String,

    /// Port the server binds to.
    pub bind_port: u16,

    /// Extra command-line flags appended after `--listen`/`--port`.
    pub extra_flags: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            interpreter: None,
            bind_ip: DEFAULT_IP.to_string(),
            bind_port: DEFAULT_PORT,
            extra_flags: split_flags(DEFAULT_FLAGS),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration rooted at the given checkout directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: Some(root_dir.into()),
            ..Self::default()
        }
    }

    /// Reads the configuration from the environment.
    pub fn from_env() -> Self {
        let root_dir = env::var(ENV_DIR).ok().filter(|s| !s.is_empty()).map(PathBuf::from);
        let interpreter = env::var(ENV_PYTHON)
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let bind_ip = env::var(ENV_IP)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_IP.to_string());

        let bind_port = match env::var(ENV_PORT) {
            Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid {} value '{}', using {}", ENV_PORT, raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            _ => DEFAULT_PORT,
        };

        let extra_flags = match env::var(ENV_FLAGS) {
            Ok(raw) => split_flags(&raw),
            Err(_) => split_flags(DEFAULT_FLAGS),
        };

        Self {
            root_dir,
            interpreter,
            bind_ip,
            bind_port,
            extra_flags,
        }
    }

    /// Sets an explicit interpreter.
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Sets the bind address and port.
    pub fn with_bind(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.bind_ip = ip.into();
        self.bind_port = port;
        self
    }

    /// Replaces the extra flags.
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags = flags;
        self
    }

    /// Resolves the interpreter used to run the server.
    ///
    /// Priority: explicit override, tool-local venv interpreter under
    /// the checkout root, then `python3` from the system PATH.
    pub fn resolve_interpreter(&self) -> PathBuf {
        if let Some(ref interpreter) = self.interpreter {
            return interpreter.clone();
        }

        if let Some(ref root) = self.root_dir {
            for candidate in VENV_INTERPRETERS {
                let path = root.join(candidate);
                if path.is_file() {
                    debug!("Using venv interpreter: {}", path.display());
                    return path;
                }
            }
        }

        PathBuf::from(FALLBACK_INTERPRETER)
    }

    /// Locates the server entry script under the checkout root.
    pub fn entry_script(&self) -> Result<PathBuf, ConfigError> {
        let root = self.root_dir.as_ref().ok_or(ConfigError::RootNotSet)?;

        if !root.is_dir() {
            return Err(ConfigError::RootMissing(root.clone()));
        }

        for candidate in ENTRY_CANDIDATES {
            let path = root.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
        }

        Err(ConfigError::EntryScriptMissing {
            root: root.clone(),
            candidates: ENTRY_CANDIDATES.join(", "),
        })
    }

    /// Builds the full server command line.
    ///
    /// Shape: `<interpreter> -u <entry> --listen <ip> --port <port> <flags...>`
    /// with the working directory set to the checkout root so the
    /// server's relative paths resolve.
    pub fn build_command(&self) -> Result<LaunchCommand, ConfigError> {
        let entry = self.entry_script()?;
        let root = self.root_dir.clone().ok_or(ConfigError::RootNotSet)?;

        let mut args = vec![
            "-u".to_string(), // unbuffered child output, required for live log streaming
            entry.display().to_string(),
            "--listen".to_string(),
            self.bind_ip.clone(),
            "--port".to_string(),
            self.bind_port.to_string(),
        ];
        args.extend(self.extra_flags.iter().cloned());

        Ok(LaunchCommand {
            program: self.resolve_interpreter(),
            args,
            cwd: root,
        })
    }
}

/// A fully-resolved server command line, ready to spawn.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchCommand {
    /// Converts into a spawnable [`Command`].
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.current_dir(&self.cwd);
        command
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Splits a raw flag string on whitespace, dropping empty pieces.
fn split_flags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_ip, DEFAULT_IP);
        assert_eq!(config.bind_port, DEFAULT_PORT);
        assert_eq!(
            config.extra_flags,
            vec!["--log-stdout".to_string(), "--disable-auto-launch".to_string()]
        );
        assert!(config.root_dir.is_none());
    }

    #[test]
    fn test_split_flags() {
        assert_eq!(split_flags("  -a   -b "), vec!["-a", "-b"]);
        assert!(split_flags("").is_empty());
    }

    #[test]
    fn test_build_command_no_root() {
        let config = ServerConfig::default();
        assert!(matches!(config.build_command(), Err(ConfigError::RootNotSet)));
    }

    #[test]
    fn test_build_command_missing_root() {
        let config = ServerConfig::new("/nonexistent/comfyui");
        assert!(matches!(
            config.build_command(),
            Err(ConfigError::RootMissing(_))
        ));
    }

    #[test]
    fn test_build_command_missing_entry_script() {
        let temp_dir = tempdir().unwrap();
        let config = ServerConfig::new(temp_dir.path());

        let err = config.build_command().unwrap_err();
        assert!(matches!(err, ConfigError::EntryScriptMissing { .. }));
        assert!(err.to_string().contains("main.py"));
    }

    #[test]
    fn test_build_command_prefers_main_py() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("main.py"), "").unwrap();
        fs::write(temp_dir.path().join("server.py"), "").unwrap();

        let config = ServerConfig::new(temp_dir.path()).with_interpreter("/usr/bin/python3");
        let launch = config.build_command().unwrap();

        assert_eq!(launch.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(launch.cwd, temp_dir.path());
        assert_eq!(launch.args[0], "-u");
        assert!(launch.args[1].ends_with("main.py"));
        assert_eq!(launch.args[2], "--listen");
        assert_eq!(launch.args[3], "127.0.0.1");
        assert_eq!(launch.args[4], "--port");
        assert_eq!(launch.args[5], "8188");
        assert!(launch.args.contains(&"--disable-auto-launch".to_string()));
    }

    #[test]
    fn test_build_command_falls_back_to_server_py() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("server.py"), "").unwrap();

        let config = ServerConfig::new(temp_dir.path());
        let launch = config.build_command().unwrap();
        assert!(launch.args[1].ends_with("server.py"));
    }

    #[test]
    fn test_build_command_custom_bind() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("main.py"), "").unwrap();

        let config = ServerConfig::new(temp_dir.path())
            .with_bind("0.0.0.0", 9000)
            .with_flags(vec!["--cpu".to_string()]);
        let launch = config.build_command().unwrap();

        assert_eq!(launch.args[3], "0.0.0.0");
        assert_eq!(launch.args[5], "9000");
        assert_eq!(launch.args.last().unwrap(), "--cpu");
    }

    #[test]
    fn test_resolve_interpreter_override() {
        let config = ServerConfig::default().with_interpreter("/opt/python");
        assert_eq!(config.resolve_interpreter(), PathBuf::from("/opt/python"));
    }

    #[test]
    fn test_resolve_interpreter_venv() {
        let temp_dir = tempdir().unwrap();
        let venv_python = temp_dir.path().join("venv/bin/python");
        fs::create_dir_all(venv_python.parent().unwrap()).unwrap();
        fs::write(&venv_python, "").unwrap();

        let config = ServerConfig::new(temp_dir.path());
        assert_eq!(config.resolve_interpreter(), venv_python);
    }

    #[test]
    fn test_resolve_interpreter_fallback() {
        let config = ServerConfig::default();
        assert_eq!(config.resolve_interpreter(), PathBuf::from("python3"));
    }

    #[test]
    fn test_launch_command_display() {
        let launch = LaunchCommand {
            program: PathBuf::from("python3"),
            args: vec!["-u".to_string(), "main.py".to_string()],
            cwd: PathBuf::from("/tmp"),
        };
        assert_eq!(launch.to_string(), "python3 -u main.py");
    }
}
