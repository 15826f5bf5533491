//! Small CLI harness for exercising [`queue_file::QueueFile`] against a real file: writes a batch
//! of records, then drains and logs them.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::{Arg, Command};
use queue_file::QueueFile;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let matches = Command::new("queue_file_demo")
        .arg(
            Arg::new("path")
                .long("path")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("count")
                .long("count")
                .takes_value(true)
                .default_value("100"),
        )
        .get_matches();

    let path = PathBuf::from(matches.value_of("path").expect("path is required"));
    let count: usize = matches
        .value_of("count")
        .expect("has default")
        .parse()
        .expect("count must be a number");

    let qf = QueueFile::open(&path, u64::MAX).expect("open queue file");
    for i in 0..count {
        let mut w = qf.writer().expect("writer");
        write!(w, "record-{}", i).expect("write");
        w.close().expect("close");
    }

    let mut seen = 0;
    while let Some(mut reader) = qf.peek().expect("peek") {
        let mut buf = String::new();
        reader.read_to_string(&mut buf).expect("read");
        drop(reader);
        qf.remove(1).expect("remove");
        seen += 1;
        tracing::info!(record = %buf, "drained");
    }

    tracing::info!(wrote = count, drained = seen, "demo complete");
}
