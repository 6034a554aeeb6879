//! Seeds a sample buffer, then scans one region of this process (the heap by
//! default, or the pathname given as the first argument) for the marker and
//! patches it through `/proc/self/mem`.
//!
//! Set `MAPSCAN_LOG` to `debug` or `trace` for more output.

#[cfg(target_os = "linux")]
fn main() {
    std::process::exit(app::main());
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("mapscan is currently not supported for OSes other than Linux");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
mod app {
    use log::{LevelFilter, Log, Metadata, Record};
    use mapscan::{
        channel::{MemoryChannel, ProcMem},
        maps::{MemoryMaps, DEFAULT_REGION},
        scan,
    };

    const SAMPLE_LEN: usize = 1024;

    struct StderrLogger;

    impl Log for StderrLogger {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record<'_>) {
            if self.enabled(record.metadata()) {
                eprintln!("[{:<5}] {}", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: StderrLogger = StderrLogger;

    fn init_logging() {
        let level = std::env::var("MAPSCAN_LOG")
            .ok()
            .and_then(|level| level.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info);
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level);
        }
    }

    pub fn main() -> i32 {
        init_logging();

        let target = std::env::args()
            .nth(1)
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());

        // The alphabet repeated, so the heap holds at least one marker.
        let sample = (0..SAMPLE_LEN)
            .map(|i| b'a' + (i % 26) as u8)
            .collect::<Vec<u8>>();

        let mut mem = match ProcMem::open_self() {
            Ok(mem) => mem,
            Err(err) => {
                log::error!("{}", err);
                return 1;
            }
        };
        log::info!("opened {}", mem.path().display());

        let maps = match MemoryMaps::read_self() {
            Ok(maps) => maps,
            Err(err) => {
                log::error!("{}", err);
                return 1;
            }
        };

        for region in &maps {
            log::debug!("{}", region);
            log::trace!(
                "region {:#x} [{}] '{}'",
                region.start,
                region.size(),
                region.pathname.to_string_lossy()
            );
        }

        match maps.find(&target) {
            Some(region) => {
                log::info!(
                    "scanning '{}' at {:#x}, {} bytes",
                    region.pathname.to_string_lossy(),
                    region.start,
                    region.size()
                );
                println!("{}", scan::scan_and_patch(&mut mem, region));
            }
            None => log::warn!("no region named '{}'", target),
        }

        // Read the sample back through the channel: the compiler does not know
        // it may have been patched.
        match mem.read_at(sample.as_ptr() as u64, sample.len()) {
            Ok(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
            Err(err) => log::warn!("failed to read back the sample: {}", err),
        }

        0
    }
}
