use log::{error, info, warn};
use std::net::TcpListener;
use std::thread;

use mjpeg_processor::mjpeg::demo::{serve_client, DemoStream};

fn main() -> std::io::Result<()> {
    env_logger::init();
    let address = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:8081".to_string());
    let listener = TcpListener::bind(&address)?;
    info!("mjpeg_demo_server listening on http://{}/", address);
    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                match stream.peer_addr() {
                    Ok(peer) => info!("client connected: {}", peer),
                    Err(e) => warn!("client connected, peer unknown: {}", e),
                }
                thread::spawn(move || {
                    if let Err(e) = serve_client(stream, &DemoStream::default()) {
                        info!("client gone: {}", e);
                    }
                });
            }
            Err(e) => error!("accept error: {}", e),
        }
    }
    Ok(())
}
