use engine::{Database, Engine};
use std::{env, time::Duration};
use tokio::runtime::Runtime;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parse environment variables
    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| String::from("sqlite:votebot.db"));
    let sweep_secs = match env::var("SWEEP_INTERVAL_SECS") {
        Ok(value) => value.parse()?,
        _ => 5,
    };
    anyhow::ensure!(sweep_secs > 0, "SWEEP_INTERVAL_SECS must be positive");

    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let db = Database::open(&db_url)
            .await
            .map_err(|err| anyhow::anyhow!("cannot open poll store at {db_url}: {err:?}"))?;
        let engine = Engine::new(db);

        log::info!("poll engine up; closing sweep every {sweep_secs}s");
        tokio::select! {
            _ = engine.run_sweeper(Duration::from_secs(sweep_secs)) => {}
            result = tokio::signal::ctrl_c() => result?,
        }

        log::info!("shutting down");
        anyhow::Ok(())
    })
}
