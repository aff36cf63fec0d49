//! Shared fixtures: a minimal canned-response HTTP server and archive
//! metadata builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

/// Serves canned responses by request path until dropped.
pub struct TestServer {
    addr: std::net::SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(routes: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let (mut sock, _) = match listener.accept() {
                    Ok(conn) => conn,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => break,
                };
                sock.set_nonblocking(false).unwrap();

                let mut data = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = sock.read(&mut buf).unwrap_or(0);
                    data.extend_from_slice(&buf[..n]);
                    if n == 0 || data.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let request_line = String::from_utf8_lossy(&data);
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let response = match routes.get(&path) {
                    Some(body) => {
                        let mut response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        response.extend_from_slice(body);
                        response
                    }
                    None => {
                        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec()
                    }
                };
                let _ = sock.write_all(&response);
            }
        });

        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn sha256_of(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Builds a Release file covering the given `main/binary-<arch>/` index
/// bodies.
pub fn release_file(codename: &str, arch: &str, indices: &[(&str, &[u8])]) -> Vec<u8> {
    let mut text = format!("Origin: Test\nCodename: {}\nSHA256:\n", codename);
    for (name, body) in indices {
        text.push_str(&format!(
            " {} {} main/binary-{}/{}\n",
            sha256_of(body),
            body.len(),
            arch,
            name
        ));
    }
    text.into_bytes()
}

/// Writes a minimal suite config directory: one essential `base` section
/// and one `edge` section, both claiming the `standard` flavour.
pub fn write_config_dir(root: &Utf8Path, essential_packages: &str, edge_packages: &str) {
    std::fs::write(root.join("suites"), "Match-Origin: Test\nConfig: test\n").unwrap();

    let config = root.join("test");
    std::fs::create_dir_all(&config).unwrap();
    std::fs::write(config.join("action"), "Action: essential-extract\n").unwrap();
    std::fs::write(
        config.join("sections"),
        "Section: base\nFlavour: standard\n\nSection: edge\nFlavour: standard\n",
    )
    .unwrap();
    std::fs::write(
        config.join("packages"),
        format!(
            "Section: base\nFlags: essential\nPackages: {}\n\nSection: edge\nPackages: {}\n",
            essential_packages, edge_packages
        ),
    )
    .unwrap();
}

pub fn utf8_path(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}
