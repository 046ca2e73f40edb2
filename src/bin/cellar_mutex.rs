//! Process bootstrap, carried here only so the crate is runnable end to
//! end: parses the population shape, validates it, spawns one task per
//! rank, and wires them together over the in-process transport.

use tracing::Instrument;

use cellar_mutex::config::Config;
use cellar_mutex::oracle::UniformVolumeOracle;
use cellar_mutex::student::Student;
use cellar_mutex::transport::build_world;
use cellar_mutex::winemaker::Winemaker;

fn parse_config() -> anyhow::Result<Config> {
    let mut config = Config {
        safehouse_count: 2,
        winemaker_count: 2,
        student_count: 3,
        min_wine_volume: 1,
        max_wine_volume: 10,
    };
    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut value = || -> anyhow::Result<u64> {
            args.next()
                .ok_or_else(|| anyhow::anyhow!("{flag} expects a value"))?
                .parse()
                .map_err(|err| anyhow::anyhow!("{flag}: {err}"))
        };
        match flag.as_str() {
            "--safehouses" => config.safehouse_count = value()? as u32,
            "--winemakers" => config.winemaker_count = value()? as u32,
            "--students" => config.student_count = value()? as u32,
            "--min-volume" => config.min_wine_volume = value()?,
            "--max-volume" => config.max_wine_volume = value()?,
            other => anyhow::bail!("unrecognized flag {other}"),
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match parse_config().and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(err) => {
            // fatal at startup: abort before entering the protocol.
            eprintln!("configuration error: {err:#}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        safehouses = config.safehouse_count,
        winemakers = config.winemaker_count,
        students = config.student_count,
        "starting cellar-mutex"
    );

    let transports = build_world(config.world_size());
    let mut handles = Vec::new();

    for (rank, transport) in transports.into_iter().enumerate() {
        let rank = rank as u32;
        let oracle = UniformVolumeOracle::from_bounds(config.min_wine_volume, config.max_wine_volume);
        if config.winemaker_ranks().contains(&rank) {
            let winemaker = Winemaker::new(&config, rank, oracle);
            let span = tracing::info_span!("winemaker", rank);
            handles.push(tokio::spawn(
                async move { winemaker.run(config, transport).await }.instrument(span),
            ));
        } else {
            let student = Student::new(&config, rank, oracle);
            let span = tracing::info_span!("student", rank);
            handles.push(tokio::spawn(
                async move { student.run(config, transport).await }.instrument(span),
            ));
        }
    }

    for handle in handles {
        handle.await??;
    }
    Ok(())
}
