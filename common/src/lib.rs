use std::{
    fmt,
    marker::PhantomData,
    net::{IpAddr, SocketAddr},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncWriteExt, BufWriter};

pub use logging_macro::Logging;

// UDP strongly typed socket
pub struct UDPSocket(Socket);

impl UDPSocket {
    /// Create a non-blocking UDP socket bound to `bind_address`, with
    /// address reuse enabled and optionally pinned to an interface.
    pub fn new(
        bind_interface: Option<&str>,
        bind_address: (IpAddr, u16),
    ) -> Result<UDPSocket> {
        let domain = match bind_address.0 {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        let socket = match bind_interface {
            Some(bi) => bind_to_device(socket, bi)?,
            None => socket,
        };

        let socket_address = SocketAddr::new(bind_address.0, bind_address.1);
        socket.bind(&socket_address.into())?;

        Ok(UDPSocket(socket))
    }
    pub fn get_mut(&mut self) -> &mut Socket {
        &mut self.0
    }
    pub fn get_ref(&self) -> &Socket {
        &self.0
    }
    pub fn into_tokio(self) -> Result<tokio::net::UdpSocket> {
        let socket: std::net::UdpSocket = self.0.into();
        Ok(tokio::net::UdpSocket::from_std(socket)?)
    }
}

pub fn bind_to_device(
    socket: Socket,
    bind_interface: &str,
) -> Result<Socket, std::io::Error> {
    // Socket2 bind_device does not have nice error types, so we have to
    // handle the libc errors. In case, we get an error when binding, map it
    // into a more friendly std::io::Error
    if let Err(err) = socket.bind_device(Some(bind_interface.as_bytes())) {
        return if matches!(err.raw_os_error(), Some(libc::ENODEV)) {
            let error_msg = format!(
                "error binding to device (`{}`): {}",
                bind_interface, err
            );
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        } else {
            let error_msg = format!("unexpected error binding device: {}", err);
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        };
    }

    Ok(socket)
}

/// Wall clock as fractional seconds since the unix epoch.
pub fn unix_now() -> Result<f64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| anyhow!("system clock before unix epoch: {}", err))?;
    Ok(now.as_secs_f64())
}

/// Row contract for the CSV log stream: `header` names the columns,
/// `Display` renders one row. Derived with `#[derive(Logging)]`.
pub trait Logging: fmt::Display {
    fn header(&self) -> String;
}

/// Buffered CSV writer for one run-scoped log stream. The header is written
/// lazily with the first row; `section` starts a new header/row block for
/// trailing summaries.
pub struct Logger<T: Logging> {
    writer: BufWriter<tokio::fs::File>,
    wrote_header: bool,
    _marker: PhantomData<T>,
}

impl<T: Logging> Logger<T> {
    pub fn new(file_name: String) -> Result<Logger<T>> {
        let file = std::fs::File::create(&file_name).map_err(|err| {
            anyhow!("failed to create {}: {}", file_name, err)
        })?;
        Ok(Logger {
            writer: BufWriter::new(tokio::fs::File::from_std(file)),
            wrote_header: false,
            _marker: PhantomData,
        })
    }

    pub async fn log(&mut self, row: &T) -> Result<()> {
        if !self.wrote_header {
            self.writer.write_all(row.header().as_bytes()).await?;
            self.wrote_header = true;
        }
        self.writer.write_all(row.to_string().as_bytes()).await?;
        Ok(())
    }

    /// Append a standalone header/row block, separated from the per-event
    /// rows by a blank line.
    pub async fn section<S: Logging>(&mut self, row: &S) -> Result<()> {
        self.writer.write_all(b"\n").await?;
        self.writer.write_all(row.header().as_bytes()).await?;
        self.writer.write_all(row.to_string().as_bytes()).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Sample aggregator for one run. Mean/min/max update incrementally; the
/// samples are retained so median and percentiles can be taken from the
/// sorted set at run end.
pub struct Statistics {
    mean: f64,
    variance: f64,
    min: f64,
    max: f64,
    samples: Vec<f64>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            mean: f64::NAN,
            variance: 0.0,
            min: f64::NAN,
            max: f64::NAN,
            samples: Vec::new(),
        }
    }

    pub fn update(&mut self, value: f64) {
        self.samples.push(value);
        let count = self.samples.len();
        if count == 1 {
            self.mean = value;
            self.variance = 0.0;
            self.min = value;
            self.max = value;
        } else {
            let old_mean = self.mean;
            self.mean = old_mean + (value - old_mean) / count as f64;
            self.variance =
                self.variance + (value - old_mean) * (value - self.mean);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.samples.is_empty()).then_some(self.mean)
    }

    pub fn min(&self) -> Option<f64> {
        (!self.samples.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.samples.is_empty()).then_some(self.max)
    }

    /// Sample standard deviation. Undefined below two samples.
    pub fn standard_deviation(&self) -> Option<f64> {
        let count = self.samples.len();
        if count < 2 {
            return None;
        }
        Some((self.variance / (count - 1) as f64).sqrt())
    }

    pub fn median(&self) -> Option<f64> {
        let sorted = self.sorted()?;
        let count = sorted.len();
        Some(if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        })
    }

    /// Value at index `floor(fraction * count)` of the ascending-sorted
    /// sample set.
    pub fn percentile(&self, fraction: f64) -> Option<f64> {
        let sorted = self.sorted()?;
        let index = (sorted.len() as f64 * fraction) as usize;
        Some(sorted[index.min(sorted.len() - 1)])
    }

    fn sorted(&self) -> Option<Vec<f64>> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        Some(sorted)
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.min(), self.mean(), self.max()) {
            (Some(min), Some(mean), Some(max)) => write!(
                f,
                "min: {:.2} mean: {:.2} max: {:.2} samples: {}",
                min,
                mean,
                max,
                self.count()
            ),
            _ => write!(f, "no samples"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_test() {
        let mut stats = Statistics::new();
        for value in 1..=10 {
            stats.update(value as f64);
        }

        assert_eq!(stats.count(), 10);
        assert_eq!(stats.mean(), Some(5.5));
        assert_eq!(stats.min(), Some(1.0));
        assert_eq!(stats.max(), Some(10.0));
        assert_eq!(stats.median(), Some(5.5));
        // sample stddev of 1..=10 is sqrt(82.5 / 9)
        let stddev = stats.standard_deviation().unwrap();
        assert!((stddev - (82.5f64 / 9.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn stats_empty() {
        let stats = Statistics::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.min(), None);
        assert_eq!(stats.max(), None);
        assert_eq!(stats.median(), None);
        assert_eq!(stats.standard_deviation(), None);
        assert_eq!(stats.percentile(0.99), None);
        assert_eq!(format!("{}", stats), "no samples");
    }

    #[test]
    fn stats_single_sample() {
        let mut stats = Statistics::new();
        stats.update(42.0);
        assert_eq!(stats.mean(), Some(42.0));
        assert_eq!(stats.median(), Some(42.0));
        assert_eq!(stats.percentile(0.5), Some(42.0));
        // one sample has no spread
        assert_eq!(stats.standard_deviation(), None);
    }

    #[test]
    fn stats_percentiles_floor_indexed() {
        let mut stats = Statistics::new();
        for value in 1..=100 {
            stats.update(value as f64);
        }
        assert_eq!(stats.percentile(0.50), Some(51.0));
        assert_eq!(stats.percentile(0.95), Some(96.0));
        assert_eq!(stats.percentile(0.99), Some(100.0));
        assert_eq!(stats.percentile(1.0), Some(100.0));
        assert_eq!(stats.median(), Some(50.5));
    }

    #[tokio::test]
    async fn logger_writes_header_and_empty_cells() {
        #[derive(Debug, Logging, Clone, Default)]
        struct TestRow {
            seq: u32,
            rtt: Option<f64>,
            note: String,
        }

        let path = std::env::temp_dir().join("common_logger_test.csv");
        let mut logger =
            Logger::new(path.to_string_lossy().into_owned()).unwrap();
        logger
            .log(&TestRow {
                seq: 1,
                rtt: Some(1.5),
                note: "a".to_string(),
            })
            .await
            .unwrap();
        logger
            .log(&TestRow {
                seq: 2,
                rtt: None,
                note: "b".to_string(),
            })
            .await
            .unwrap();
        logger.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "seq,rtt,note\n1,1.5,a\n2,,b\n");
        std::fs::remove_file(&path).unwrap();
    }
}
