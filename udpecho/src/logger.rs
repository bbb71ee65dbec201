use common::Logging;

/// One row per probe, written regardless of outcome. Fields that only exist
/// for a successful round trip stay empty otherwise.
#[derive(Debug, Logging, Clone, Default)]
pub struct ProbeRecord {
    pub seq: u32,
    pub status: String,
    pub send_timestamp: f64,
    pub send_time: String,
    pub recv_timestamp: Option<f64>,
    pub recv_time: Option<String>,
    pub rtt_us: Option<f64>,
    pub response_size: Option<usize>,
    pub responder: Option<String>,
    pub error: Option<String>,
}

/// One row per packet the responder echoed.
#[derive(Debug, Logging, Clone, Default)]
pub struct EchoRecord {
    pub index: u64,
    pub recv_timestamp: f64,
    pub echo_timestamp: f64,
    pub processing_us: f64,
    pub size: usize,
    pub sender: String,
}

/// Trailing block of the prober log. RTT-derived fields are empty when no
/// round trip completed; stddev additionally needs two samples.
#[derive(Debug, Logging, Clone, Default)]
pub struct SummaryRecord {
    pub sent_count: u64,
    pub received_count: u64,
    pub loss_rate_percent: Option<f64>,
    pub min_us: Option<f64>,
    pub max_us: Option<f64>,
    pub mean_us: Option<f64>,
    pub median_us: Option<f64>,
    pub stddev_us: Option<f64>,
    pub p50_us: Option<f64>,
    pub p95_us: Option<f64>,
    pub p99_us: Option<f64>,
}

/// Default log file name for a run started now.
pub fn timestamped_path(prefix: &str) -> String {
    format!("{}_{}.csv", prefix, chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Local-time rendering of an epoch timestamp, microsecond precision.
pub fn human_time(timestamp: f64) -> String {
    let secs = timestamp.trunc() as i64;
    let nanos = (timestamp.fract() * 1e9) as u32;
    match chrono::DateTime::from_timestamp(secs, nanos) {
        Some(time) => time
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn probe_record_field_order() {
        assert_eq!(
            ProbeRecord::default().header(),
            "seq,status,send_timestamp,send_time,recv_timestamp,recv_time,\
             rtt_us,response_size,responder,error\n"
        );
    }

    #[test]
    fn echo_record_field_order() {
        assert_eq!(
            EchoRecord::default().header(),
            "index,recv_timestamp,echo_timestamp,processing_us,size,sender\n"
        );
    }

    #[test]
    fn summary_record_field_order() {
        assert_eq!(
            SummaryRecord::default().header(),
            "sent_count,received_count,loss_rate_percent,min_us,max_us,\
             mean_us,median_us,stddev_us,p50_us,p95_us,p99_us\n"
        );
    }

    #[test]
    fn absent_fields_render_as_empty_cells() {
        let row = ProbeRecord {
            seq: 3,
            status: "timeout".to_string(),
            send_timestamp: 100.5,
            send_time: "t".to_string(),
            ..Default::default()
        };
        assert_eq!(row.to_string(), "3,timeout,100.5,t,,,,,,\n");
    }

    #[test]
    fn human_time_renders_something() {
        assert!(!human_time(1700000000.5).is_empty());
    }

    #[test]
    fn timestamped_path_has_prefix_and_extension() {
        let path = timestamped_path("udpecho_probe");
        assert!(path.starts_with("udpecho_probe_"));
        assert!(path.ends_with(".csv"));
    }
}
