//! Shared-memory transport
//!
//! A Unix-domain socket paired with a System-V shared-memory segment gives
//! clients a zero-copy path: the socket only carries little-endian u32
//! framing (`shm id` at handshake, then `(start, length)` per direction)
//! while request and response bytes live in the segment. The client owns
//! the segment; the server attaches to whatever id the handshake names.

use crate::context::encode_error_response;
use crate::error::{Error, Result};
use crate::server::{handle_request_bytes, AppContext};
use actix_web::ResponseError;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

pub(crate) async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<u32> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw).await?;
    Ok(u32::from_le_bytes(raw))
}

pub(crate) async fn write_u32<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: u32,
) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes()).await
}

/// An attached System-V shared-memory segment
#[derive(Debug)]
pub struct ShmSegment {
    id: i32,
    base: *mut u8,
    size: usize,
    owned: bool,
}

// the raw base pointer is only touched through &self/&mut self methods
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Create a private segment of `size` bytes and attach it
    pub fn create(size: usize) -> Result<Self> {
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o777) };
        if id < 0 {
            return Err(Error::transport(format!(
                "could not shmget {} bytes: {}",
                size,
                std::io::Error::last_os_error()
            )));
        }
        Self::attach_id(id, true)
    }

    /// Attach an existing segment by id
    pub fn attach(id: i32) -> Result<Self> {
        Self::attach_id(id, false)
    }

    fn attach_id(id: i32, owned: bool) -> Result<Self> {
        let base = unsafe { libc::shmat(id, ptr::null(), 0) };
        if base as isize == -1 {
            return Err(Error::transport(format!(
                "could not attach shared-memory segment {}: {}",
                id,
                std::io::Error::last_os_error()
            )));
        }
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) } != 0 {
            unsafe { libc::shmdt(base) };
            return Err(Error::transport(format!(
                "could not stat shared-memory segment {}: {}",
                id,
                std::io::Error::last_os_error()
            )));
        }
        Ok(ShmSegment {
            id,
            base: base as *mut u8,
            size: stat.shm_segsz as usize,
            owned,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `len` bytes starting at `start` out of the segment
    pub fn read(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        if start.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(Error::transport(format!(
                "frame [{start}, {start}+{len}) exceeds the {}-byte segment",
                self.size
            )));
        }
        let mut out = vec![0u8; len];
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(start), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Copy `data` into the segment at `start`
    pub fn write(&mut self, start: usize, data: &[u8]) -> Result<()> {
        if start.checked_add(data.len()).map_or(true, |end| end > self.size) {
            return Err(Error::transport(format!(
                "response of {} bytes does not fit the {}-byte segment",
                data.len(),
                self.size
            )));
        }
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(start), data.len());
        }
        Ok(())
    }

    /// Mark the segment for removal once every attachment is gone
    pub fn remove(&self) {
        unsafe {
            libc::shmctl(self.id, libc::IPC_RMID, ptr::null_mut());
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.base as *const libc::c_void);
        }
        if self.owned {
            self.remove();
        }
    }
}

/// Accept loop for the shared-memory transport
pub(crate) async fn serve_shm(app: Arc<AppContext>, socket: PathBuf) -> Result<()> {
    let _ = std::fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket)?;
    info!("shared-memory transport listening on '{}'", socket.display());
    loop {
        let (stream, _) = listener.accept().await?;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = serve_shm_conn(app, stream).await {
                warn!("shared-memory session ended with error: {e}");
            }
        });
    }
}

async fn serve_shm_conn(app: Arc<AppContext>, mut stream: UnixStream) -> Result<()> {
    let shm_id = read_u32(&mut stream).await? as i32;
    let mut segment = ShmSegment::attach(shm_id)?;
    debug!(
        "attached shared-memory segment {shm_id} ({} bytes)",
        segment.size()
    );
    loop {
        let start = match read_u32(&mut stream).await {
            Ok(v) => v as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let len = read_u32(&mut stream).await? as usize;
        let request = segment.read(start, len)?;

        let has_died = Arc::new(AtomicBool::new(false));
        let response =
            match handle_request_bytes(Arc::clone(&app), request.into(), has_died).await {
                Ok(bytes) => bytes,
                // no status-code side channel here: answer with error records
                Err(e) => encode_error_response(e.status_code().as_u16() as i64, &e.to_string()),
            };

        segment.write(0, &response)?;
        write_u32(&mut stream, 0).await?;
        write_u32(&mut stream, response.len() as u32).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_read_write() {
        let mut seg = ShmSegment::create(4096).unwrap();
        assert!(seg.size() >= 4096);
        seg.write(128, b"hello shared world").unwrap();
        assert_eq!(seg.read(128, 18).unwrap(), b"hello shared world");
    }

    #[test]
    fn test_segment_bounds_are_checked() {
        let mut seg = ShmSegment::create(1024).unwrap();
        assert!(seg.read(1020, 8).is_err());
        assert!(seg.write(1020, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_attach_by_id_sees_writes() {
        let mut owner = ShmSegment::create(2048).unwrap();
        owner.write(0, b"frame").unwrap();
        let peer = ShmSegment::attach(owner.id()).unwrap();
        assert_eq!(peer.read(0, 5).unwrap(), b"frame");
    }

    #[tokio::test]
    async fn test_u32_framing() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_u32(&mut a, 0xdead_beef).await.unwrap();
        write_u32(&mut a, 7).await.unwrap();
        assert_eq!(read_u32(&mut b).await.unwrap(), 0xdead_beef);
        assert_eq!(read_u32(&mut b).await.unwrap(), 7);
    }
}
