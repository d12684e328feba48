use ld_agent::{Agent, FnDigester, RawMeasurement, SimulatedBeamline};
use ld_types::{AgentConfig, DegreeOfFreedom, Objective};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let iterations: usize = std::env::var("LODESTAR_ITERATIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(12);
    let batch_size: usize = std::env::var("LODESTAR_BATCH")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);

    let mut centers = HashMap::new();
    centers.insert("x1".to_string(), 1.0);
    centers.insert("x2".to_string(), -0.5);
    let beamline = SimulatedBeamline::new(centers, 1.5, 0.02, 7);

    let digester = FnDigester(|raw: &RawMeasurement| {
        let mut out = HashMap::new();
        out.insert("intensity".to_string(), raw.values.get("intensity").copied());
        out
    });

    let mut agent = Agent::builder()
        .dof(DegreeOfFreedom::continuous("x1", -5.0, 5.0))
        .dof(DegreeOfFreedom::continuous("x2", -5.0, 5.0))
        .objective(Objective::maximize("intensity"))
        .config(
            AgentConfig::default()
                .with_batch_size(batch_size)
                .with_seed(7),
        )
        .executor(Arc::new(beamline))
        .digester(Arc::new(digester))
        .build()?;

    let report = agent
        .learn("expected-improvement", batch_size, iterations)
        .await?;

    println!(
        "ran {} iterations, recorded {} observations",
        report.iterations.len(),
        report.records_added
    );
    let position = agent.position();
    let posterior = agent.predict("intensity", &position)?;
    println!(
        "final position {position:?}: predicted intensity {:.4} ± {:.4}",
        posterior.mean, posterior.sigma
    );
    Ok(())
}
