//! Delivery of a batch's files to the NCBI submission FTP area.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::{debug, info};

use crate::config::FtpSettings;
use crate::domain::SubmissionType;
use crate::error::PushError;
use crate::store::SENTINEL_FILE;

const PROGRESS_EVERY: usize = 100;

/// One open, stateful connection to the remote endpoint.
pub trait RemoteSession {
    fn cwd(&mut self, dir: &str) -> Result<(), PushError>;
    /// Names of the entries in the current remote directory.
    fn list(&mut self) -> Result<Vec<String>, PushError>;
    fn mkdir(&mut self, dir: &str) -> Result<(), PushError>;
    fn put(&mut self, remote_name: &str, local: &Utf8Path) -> Result<(), PushError>;
    fn quit(&mut self) -> Result<(), PushError>;
}

pub trait TransferClient: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn RemoteSession>, PushError>;
}

#[derive(Debug, Clone, Deserialize)]
struct FtpCredentials {
    username: String,
    password: String,
}

fn read_credentials(path: &Utf8Path) -> Result<FtpCredentials, PushError> {
    let content =
        fs::read_to_string(path).map_err(|_| PushError::CredentialsRead(path.to_path_buf()))?;
    serde_json::from_str(&content).map_err(|_| PushError::CredentialsRead(path.to_path_buf()))
}

#[derive(Debug, Clone)]
pub struct FtpClient {
    settings: FtpSettings,
}

impl FtpClient {
    pub fn new(settings: FtpSettings) -> Self {
        Self { settings }
    }
}

impl TransferClient for FtpClient {
    fn open_session(&self) -> Result<Box<dyn RemoteSession>, PushError> {
        let credentials = read_credentials(&self.settings.credentials_path)?;
        let address = (self.settings.host.as_str(), 21)
            .to_socket_addrs()
            .map_err(|err| PushError::Ftp(format!("resolve {}: {err}", self.settings.host)))?
            .next()
            .ok_or_else(|| PushError::Ftp(format!("no address for {}", self.settings.host)))?;

        let mut stream = FtpStream::connect_timeout(address, self.settings.timeout)
            .map_err(|err| PushError::Ftp(format!("connect {}: {err}", self.settings.host)))?;
        apply_io_timeouts(stream.get_ref(), self.settings.timeout)
            .map_err(|err| PushError::Ftp(format!("socket timeouts: {err}")))?;
        stream
            .login(credentials.username.as_str(), credentials.password.as_str())
            .map_err(|err| PushError::Ftp(format!("login: {err}")))?;
        stream.set_mode(if self.settings.passive {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream
            .transfer_type(FileType::Binary)
            .map_err(|err| PushError::Ftp(err.to_string()))?;
        debug!("connected to {}", self.settings.host);
        Ok(Box::new(FtpSession { stream }))
    }
}

/// Bounds every read and write on the control connection. Zero means no limit.
fn apply_io_timeouts(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    let timeout = Some(timeout).filter(|timeout| !timeout.is_zero());
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)
}

struct FtpSession {
    stream: FtpStream,
}

impl RemoteSession for FtpSession {
    fn cwd(&mut self, dir: &str) -> Result<(), PushError> {
        self.stream
            .cwd(dir)
            .map_err(|err| PushError::Ftp(format!("cwd {dir}: {err}")))
    }

    fn list(&mut self) -> Result<Vec<String>, PushError> {
        let names = self
            .stream
            .nlst(None)
            .map_err(|err| PushError::Ftp(format!("nlst: {err}")))?;
        // some servers answer NLST with paths rather than bare names
        Ok(names
            .into_iter()
            .map(|name| name.rsplit('/').next().unwrap_or(&name).to_string())
            .collect())
    }

    fn mkdir(&mut self, dir: &str) -> Result<(), PushError> {
        self.stream
            .mkdir(dir)
            .map_err(|err| PushError::Ftp(format!("mkdir {dir}: {err}")))
    }

    fn put(&mut self, remote_name: &str, local: &Utf8Path) -> Result<(), PushError> {
        let mut file = File::open(local.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("open {local}: {err}")))?;
        self.stream
            .put_file(remote_name, &mut file)
            .map_err(|err| PushError::Ftp(format!("put {remote_name}: {err}")))?;
        Ok(())
    }

    fn quit(&mut self) -> Result<(), PushError> {
        self.stream
            .quit()
            .map_err(|err| PushError::Ftp(format!("quit: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransferSummary {
    pub remote_dir: String,
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// Uploads one batch per session: payload files, then the submission
/// document, then the sentinel.
pub struct TransferAgent<'a, T: TransferClient + ?Sized> {
    client: &'a T,
    inter_file_delay: Duration,
}

impl<'a, T: TransferClient + ?Sized> TransferAgent<'a, T> {
    pub fn new(client: &'a T, inter_file_delay: Duration) -> Self {
        Self {
            client,
            inter_file_delay,
        }
    }

    /// `files` are sent in order under their base names; any whose name is
    /// already present remotely is skipped. The sentinel is always sent.
    pub fn upload_batch(
        &self,
        submission_type: SubmissionType,
        action_name: &str,
        files: &[Utf8PathBuf],
        sentinel: &Utf8Path,
    ) -> Result<TransferSummary, PushError> {
        let mut session = self.client.open_session()?;
        let remote_dir = format!("{}/{action_name}", submission_type.remote_dir());

        session.cwd(submission_type.remote_dir())?;
        if !session.list()?.iter().any(|name| name == action_name) {
            session.mkdir(action_name)?;
        }
        session.cwd(action_name)?;

        let existing: HashSet<String> = session.list()?.into_iter().collect();
        let mut uploaded = Vec::new();
        let mut skipped = Vec::new();
        for (index, file) in files.iter().enumerate() {
            let name = file
                .file_name()
                .ok_or_else(|| PushError::Filesystem(format!("{file} has no file name")))?;
            if name == SENTINEL_FILE {
                continue;
            }
            if existing.contains(name) {
                debug!("{remote_dir}/{name} already exists, skipping");
                skipped.push(name.to_string());
            } else {
                session.put(name, file)?;
                uploaded.push(name.to_string());
            }
            self.pause();
            if (index + 1) % PROGRESS_EVERY == 0 {
                info!("{remote_dir}: {} of {} files processed", index + 1, files.len());
            }
        }

        session.put(SENTINEL_FILE, sentinel)?;
        uploaded.push(SENTINEL_FILE.to_string());
        session.quit()?;
        info!(
            "{remote_dir}: uploaded {} files, {} already present",
            uploaded.len(),
            skipped.len()
        );

        Ok(TransferSummary {
            remote_dir,
            uploaded,
            skipped,
        })
    }

    fn pause(&self) {
        if !self.inter_file_delay.is_zero() {
            thread::sleep(self.inter_file_delay);
        }
    }
}
