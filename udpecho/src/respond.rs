use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use common::{unix_now, Logger, UDPSocket};
use tokio_util::sync::CancellationToken;

use crate::{
    args,
    logger::{timestamped_path, EchoRecord},
    shutdown_token,
};

pub struct Responder {
    /// UDP socket bound to the listen endpoint
    socket: tokio::net::UdpSocket,
    /// Packets processed so far
    count: u64,
    /// Logger
    logger: Logger<EchoRecord>,
}

impl Responder {
    pub fn new(opts: args::RespondOpts) -> Result<Responder> {
        let socket = UDPSocket::new(
            opts.iface.as_deref(),
            (opts.listen_addr, opts.listen_port),
        )
        .map_err(|err| {
            anyhow!(
                "failed to bind {}:{}: {}",
                opts.listen_addr,
                opts.listen_port,
                err
            )
        })?
        .into_tokio()?;

        let file_name = opts
            .file
            .clone()
            .unwrap_or_else(|| timestamped_path("udpecho_respond"));
        let logger = Logger::new(file_name)?;

        Ok(Responder {
            socket,
            count: 0,
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("Listening on {}", self.local_addr()?);

        let cancel = shutdown_token();
        let result = self.echo_loop(&cancel).await;
        self.finish().await?;
        result
    }

    async fn echo_loop(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; u16::MAX as usize];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, sender) = received?;
                    let recv_timestamp = unix_now()?;
                    self.count += 1;

                    // Payload bytes are opaque, echoed back untouched. One
                    // unreachable client must not take the loop down.
                    if let Err(err) =
                        self.socket.send_to(&buf[..len], sender).await
                    {
                        println!("failed to echo to {}: {}", sender, err);
                    }
                    let echo_timestamp = unix_now()?;
                    let processing_us =
                        (echo_timestamp - recv_timestamp) * 1e6;

                    println!(
                        "[{:06}] {} bytes from {} echoed in {:.2} us",
                        self.count, len, sender, processing_us
                    );
                    self.logger
                        .log(&EchoRecord {
                            index: self.count,
                            recv_timestamp,
                            echo_timestamp,
                            processing_us,
                            size: len,
                            sender: sender.to_string(),
                        })
                        .await?;
                }
                _ = cancel.cancelled() => {
                    println!("\nShutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Runs on every exit path: report the packet total, then flush.
    async fn finish(&mut self) -> Result<()> {
        println!("Total packets processed: {}", self.count);
        self.logger.flush().await
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn temp_log(name: &str) -> String {
        std::env::temp_dir()
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    async fn spawn_responder(
        log_name: &str,
    ) -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let mut responder = Responder::new(args::RespondOpts {
            listen_addr: "127.0.0.1".parse().unwrap(),
            listen_port: 0,
            iface: None,
            file: Some(temp_log(log_name)),
        })
        .unwrap();
        let addr = responder.local_addr().unwrap();
        let handle = tokio::spawn(async move { responder.run().await });
        (addr, handle)
    }

    async fn echo_once(
        client: &tokio::net::UdpSocket,
        server: SocketAddr,
        payload: &[u8],
    ) -> (Vec<u8>, SocketAddr) {
        client.send_to(payload, server).await.unwrap();
        let mut buf = vec![0u8; u16::MAX as usize];
        let (len, from) =
            tokio::time::timeout(
                Duration::from_secs(1),
                client.recv_from(&mut buf),
            )
            .await
            .unwrap()
            .unwrap();
        buf.truncate(len);
        (buf, from)
    }

    #[tokio::test]
    async fn echoes_bytes_verbatim() {
        let (server, handle) = spawn_responder("verbatim_respond.csv").await;
        let client =
            tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let probe = crate::protocol::ProbeHeader {
            seq: 1,
            timestamp: 1700000000.25,
        }
        .encode(64);
        let (echoed, from) = echo_once(&client, server, &probe).await;
        assert_eq!(echoed, probe);
        assert_eq!(from, server);

        handle.abort();
    }

    #[tokio::test]
    async fn malformed_and_large_payloads_are_still_echoed() {
        let (server, handle) = spawn_responder("opaque_respond.csv").await;
        let client =
            tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Far too short to be a probe header
        let (echoed, _) = echo_once(&client, server, b"abc").await;
        assert_eq!(echoed, b"abc");

        let big = vec![0xa5u8; 4096];
        let (echoed, _) = echo_once(&client, server, &big).await;
        assert_eq!(echoed, big);

        handle.abort();
    }

    #[tokio::test]
    async fn unusable_listen_address_is_an_error() {
        // 203.0.113.0/24 is reserved for documentation, never local
        let bad = Responder::new(args::RespondOpts {
            listen_addr: "203.0.113.1".parse().unwrap(),
            listen_port: 0,
            iface: None,
            file: Some(temp_log("bind_bad.csv")),
        });
        assert!(bad.is_err());
    }
}
