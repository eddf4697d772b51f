//! Synthetic MJPEG-over-HTTP stream, for demos and tests.
use log::{debug, info};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use super::state::JPEG_SOI;

const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// How the demo server paces and bounds its output.
#[derive(Clone, Debug)]
pub struct DemoStream {
    /// Boundary token announced in the content-type, without `--`.
    pub boundary: String,
    /// Pause between parts.
    pub interval: Duration,
    /// Close the connection after this many parts; `None` streams forever.
    pub frame_limit: Option<usize>,
    /// Filler bytes per image.
    pub payload_len: usize,
}

impl Default for DemoStream {
    fn default() -> Self {
        Self {
            boundary: "frame".to_string(),
            interval: Duration::from_millis(100),
            frame_limit: None,
            payload_len: 2048,
        }
    }
}

/// Fake JPEG: start marker, `id` and a rolling filler, end marker.
pub fn build_image(id: u32, payload_len: usize) -> Vec<u8> {
    let mut image = Vec::with_capacity(payload_len + 8);
    image.extend_from_slice(&JPEG_SOI);
    image.extend_from_slice(&id.to_be_bytes());
    image.extend((0..payload_len).map(|i| (i % 200) as u8));
    image.extend_from_slice(&JPEG_EOI);
    image
}

/// One multipart part: boundary line, part headers, image bytes.
pub fn build_part(boundary: &str, image: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        boundary,
        image.len()
    )
    .into_bytes();
    part.extend_from_slice(image);
    part.extend_from_slice(b"\r\n");
    part
}

/// Answer one HTTP request on `stream` with an endless (or bounded) MJPEG body.
pub fn serve_client(mut stream: TcpStream, config: &DemoStream) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        debug!("request: {}", line.trim_end());
    }

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nConnection: close\r\nCache-Control: no-cache\r\n\r\n",
        config.boundary
    );
    stream.write_all(head.as_bytes())?;

    let mut id: u32 = 0;
    while config.frame_limit.map_or(true, |limit| (id as usize) < limit) {
        let image = build_image(id, config.payload_len);
        stream.write_all(&build_part(&config.boundary, &image))?;
        stream.flush()?;
        id = id.wrapping_add(1);
        if !config.interval.is_zero() {
            thread::sleep(config.interval);
        }
    }
    stream.write_all(format!("--{}--\r\n", config.boundary).as_bytes())?;
    info!("served {} frames", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_marker_delimited() {
        let image = build_image(7, 16);
        assert_eq!(image.len(), 16 + 8);
        assert_eq!(&image[..2], &JPEG_SOI);
        assert_eq!(&image[2..6], &7u32.to_be_bytes());
        assert_eq!(&image[image.len() - 2..], &JPEG_EOI);
    }

    #[test]
    fn part_starts_with_boundary_and_ends_with_crlf() {
        let part = build_part("frame", &[0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']));
    }
}
