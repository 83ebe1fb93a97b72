use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::server::{ServerConfig, StreamServer};

/// Destinations for the encoded bitstream: the web server, a raw TCP socket and an `.h264` file.
#[derive(Default)]
pub struct StreamOutput {
    server: Option<StreamServer>,
    socket: Option<TcpStream>,
    file: Option<(PathBuf, BufWriter<File>)>,
}

impl StreamOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_server(&mut self, config: &ServerConfig) -> Result<u16> {
        let server = StreamServer::start(config)?;
        let port = server.port();
        self.server = Some(server);
        Ok(port)
    }

    pub fn server(&self) -> Option<&StreamServer> {
        self.server.as_ref()
    }

    pub fn stop_server(&mut self) {
        self.server = None;
    }

    pub fn connect_socket(&mut self, addr: impl ToSocketAddrs) -> Result<()> {
        let socket = TcpStream::connect(addr)?;
        socket.set_nodelay(true)?;
        self.socket = Some(socket);
        Ok(())
    }

    pub fn is_streaming_to_file(&self) -> bool {
        self.file.is_some()
    }

    /// Starts or stops writing `<filename>.h264`. Stopping logs how to remux the capture.
    pub fn set_stream_to_file(&mut self, enabled: bool, filename: &Path) -> Result<()> {
        match (enabled, self.file.is_some()) {
            (true, false) => {
                let path = filename.with_extension("h264");
                let file = File::create(&path)?;
                info!("Streaming to {}", path.display());
                self.file = Some((path, BufWriter::new(file)));
            }
            (false, true) => {
                if let Some((path, mut writer)) = self.file.take() {
                    writer.flush()?;
                    let mp4 = path.with_extension("mp4");
                    info!(
                        "Stream saved, convert with: ffmpeg -framerate 30 -i {} -c copy {}",
                        path.display(),
                        mp4.display()
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.server.is_some() || self.socket.is_some() || self.file.is_some()
    }

    /// Sends one encoded frame to every open sink.
    ///
    /// A failing socket is dropped so later frames keep flowing to the other sinks.
    pub fn push(&mut self, data: &[u8], width: u32, height: u32) -> Result<()> {
        if let Some(server) = &self.server {
            server.push_h264(data, width, height);
        }
        if let Some((_, writer)) = &mut self.file {
            writer.write_all(data)?;
        }
        if let Some(socket) = &mut self.socket {
            if let Err(err) = socket.write_all(data) {
                warn!("Stream socket closed: {err}");
                self.socket = None;
                return Err(ServerError::SocketClosed(err.to_string()));
            }
        }
        Ok(())
    }
}

impl Drop for StreamOutput {
    fn drop(&mut self) {
        if let Some((_, writer)) = &mut self.file {
            if let Err(err) = writer.flush() {
                warn!("Failed to flush stream file: {err}");
            }
        }
    }
}
