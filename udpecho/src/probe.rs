use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use common::{unix_now, Logger, Statistics, UDPSocket};
use tokio_util::sync::CancellationToken;

use crate::{
    args,
    logger::{human_time, timestamped_path, ProbeRecord, SummaryRecord},
    protocol::{self, ProbeHeader},
    shutdown_token,
};

/// How long each probe waits for its echo before it counts as lost.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Classified result of a single probe attempt.
enum Outcome {
    Ok {
        rtt_us: f64,
        response_size: usize,
        responder: SocketAddr,
        recv_timestamp: f64,
    },
    Timeout,
    TransportError {
        message: String,
    },
}

pub struct Prober {
    /// UDP socket, bound to an ephemeral port
    socket: tokio::net::UdpSocket,
    /// Probe options
    opts: args::ProbeOpts,
    /// Send attempts so far
    sent: u64,
    /// Echoes received so far
    received: u64,
    /// Rtt statistics over the successful round trips
    rtt_stats: Statistics,
    /// Logger
    logger: Logger<ProbeRecord>,
}

impl Prober {
    pub fn new(opts: args::ProbeOpts) -> Result<Prober> {
        if opts.size < protocol::HEADER_LEN {
            return Err(anyhow!(
                "packet size must be at least {} bytes to hold the probe \
                 header",
                protocol::HEADER_LEN
            ));
        }
        if opts.size > protocol::MAX_DATAGRAM {
            return Err(anyhow!(
                "packet size must not exceed {} bytes",
                protocol::MAX_DATAGRAM
            ));
        }
        if opts.interval < 0.0 {
            return Err(anyhow!("interval must not be negative"));
        }

        let bind_addr = match opts.dst_addr {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UDPSocket::new(opts.iface.as_deref(), (bind_addr, 0))?
            .into_tokio()?;

        let file_name = opts
            .file
            .clone()
            .unwrap_or_else(|| timestamped_path("udpecho_probe"));
        let logger = Logger::new(file_name)?;

        Ok(Prober {
            socket,
            opts,
            sent: 0,
            received: 0,
            rtt_stats: Statistics::new(),
            logger,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "Probing {}:{} with {} byte datagrams",
            self.opts.dst_addr, self.opts.dst_port, self.opts.size
        );
        println!(
            "count {}, interval {} s, timeout {} s",
            self.opts.count,
            self.opts.interval,
            RESPONSE_TIMEOUT.as_secs_f64()
        );

        let cancel = shutdown_token();
        let result = self.probe_loop(&cancel).await;
        self.finish().await?;
        result
    }

    async fn probe_loop(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; u16::MAX as usize];
        let interval = Duration::from_secs_f64(self.opts.interval);

        for seq in 1..=self.opts.count {
            // Cancellation is observed between iterations only, so every
            // sent probe still gets its outcome row.
            if cancel.is_cancelled() {
                println!("\nProbe run interrupted");
                break;
            }

            self.probe_once(seq, &mut buf).await?;

            if seq < self.opts.count {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
        Ok(())
    }

    async fn probe_once(&mut self, seq: u32, buf: &mut [u8]) -> Result<()> {
        let send_timestamp = unix_now()?;
        let payload = ProbeHeader {
            seq,
            timestamp: send_timestamp,
        }
        .encode(self.opts.size);

        let send_instant = Instant::now();
        self.sent += 1;
        let outcome = match self
            .socket
            .send_to(&payload, (self.opts.dst_addr, self.opts.dst_port))
            .await
        {
            Ok(_) => {
                match tokio::time::timeout(
                    RESPONSE_TIMEOUT,
                    self.socket.recv_from(buf),
                )
                .await
                {
                    Ok(Ok((len, addr))) => {
                        let rtt_us =
                            send_instant.elapsed().as_secs_f64() * 1e6;
                        let recv_timestamp = unix_now()?;
                        self.received += 1;
                        self.rtt_stats.update(rtt_us);
                        Outcome::Ok {
                            rtt_us,
                            response_size: len,
                            responder: addr,
                            recv_timestamp,
                        }
                    }
                    Ok(Err(err)) => Outcome::TransportError {
                        message: err.to_string(),
                    },
                    Err(_) => Outcome::Timeout,
                }
            }
            Err(err) => Outcome::TransportError {
                message: err.to_string(),
            },
        };

        self.record(seq, send_timestamp, outcome).await
    }

    async fn record(
        &mut self,
        seq: u32,
        send_timestamp: f64,
        outcome: Outcome,
    ) -> Result<()> {
        let mut row = ProbeRecord {
            seq,
            send_timestamp,
            send_time: human_time(send_timestamp),
            ..Default::default()
        };
        match outcome {
            Outcome::Ok {
                rtt_us,
                response_size,
                responder,
                recv_timestamp,
            } => {
                println!(
                    "{} bytes from {}: seq={} time={:.2} us",
                    response_size, responder, seq, rtt_us
                );
                row.status = "ok".to_string();
                row.recv_timestamp = Some(recv_timestamp);
                row.recv_time = Some(human_time(recv_timestamp));
                row.rtt_us = Some(rtt_us);
                row.response_size = Some(response_size);
                row.responder = Some(responder.to_string());
            }
            Outcome::Timeout => {
                println!("seq={} request timed out", seq);
                row.status = "timeout".to_string();
            }
            Outcome::TransportError { message } => {
                println!("seq={} transport error: {}", seq, message);
                row.status = "error".to_string();
                row.error = Some(message);
            }
        }
        self.logger.log(&row).await
    }

    /// Runs on every exit path: summary to console and log, then flush.
    async fn finish(&mut self) -> Result<()> {
        let stats = &self.rtt_stats;
        let loss_rate_percent = (self.sent > 0).then(|| {
            (self.sent - self.received) as f64 / self.sent as f64 * 100.0
        });

        println!();
        println!(
            "--- {}:{} probe statistics ---",
            self.opts.dst_addr, self.opts.dst_port
        );
        match loss_rate_percent {
            Some(loss) => println!(
                "{} packets transmitted, {} received, {:.2}% packet loss",
                self.sent, self.received, loss
            ),
            None => println!("no packets transmitted"),
        }
        if let (Some(min), Some(mean), Some(median), Some(max)) =
            (stats.min(), stats.mean(), stats.median(), stats.max())
        {
            println!(
                "rtt min/mean/median/max = {:.2}/{:.2}/{:.2}/{:.2} us",
                min, mean, median, max
            );
        } else {
            println!("no round trips completed");
        }
        if let Some(stddev) = stats.standard_deviation() {
            println!("rtt stddev = {:.2} us", stddev);
        }
        if let (Some(p50), Some(p95), Some(p99)) = (
            stats.percentile(0.50),
            stats.percentile(0.95),
            stats.percentile(0.99),
        ) {
            println!("rtt p50/p95/p99 = {:.2}/{:.2}/{:.2} us", p50, p95, p99);
        }

        let summary = SummaryRecord {
            sent_count: self.sent,
            received_count: self.received,
            loss_rate_percent,
            min_us: stats.min(),
            max_us: stats.max(),
            mean_us: stats.mean(),
            median_us: stats.median(),
            stddev_us: stats.standard_deviation(),
            p50_us: stats.percentile(0.50),
            p95_us: stats.percentile(0.95),
            p99_us: stats.percentile(0.99),
        };
        self.logger.section(&summary).await?;
        self.logger.flush().await
    }
}
