//! End-to-end exercises of the ask/tell loop against synthetic objectives.

use ld_agent::{Agent, FnDigester, Observation, RawMeasurement, SimulatedBeamline};
use ld_types::{AgentConfig, DegreeOfFreedom, DofValue, Objective};
use std::collections::HashMap;
use std::sync::Arc;

fn quadratic(x1: f64, x2: f64) -> f64 {
    (x1 - 2.0).powi(2) + (x2 - 3.0).powi(2)
}

fn float(point: &HashMap<String, DofValue>, name: &str) -> f64 {
    match point.get(name) {
        Some(DofValue::Float(v)) => *v,
        other => panic!("expected float for {name}, got {other:?}"),
    }
}

#[tokio::test]
async fn surrogate_guides_toward_the_minimum() {
    let mut agent = Agent::builder()
        .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
        .dof(DegreeOfFreedom::continuous("x2", -6.0, 6.0))
        .objective(Objective::minimize("f"))
        .config(AgentConfig::default().with_seed(17))
        .build()
        .unwrap();

    // Seed the table with space-filling evaluations of the quadratic.
    let seeding = agent.ask("quasi-random", 20).unwrap();
    let mut observed = Vec::new();
    let mut observations = Vec::new();
    for point in &seeding.points {
        let f = quadratic(float(point, "x1"), float(point, "x2"));
        observed.push(f);
        let mut outcomes = HashMap::new();
        outcomes.insert("f".to_string(), Some(f));
        observations.push(Observation {
            inputs: point.clone(),
            outcomes,
        });
    }
    agent.tell(observations).await.unwrap();
    assert_eq!(agent.table().len(), 20);

    let proposal = agent.ask("expected-improvement", 1).unwrap();
    assert_eq!(proposal.acquisition, "expected-improvement");
    let candidate = &proposal.points[0];

    // The proposed point should look better than a typical seeding point.
    let posterior = agent.predict("f", candidate).unwrap();
    let mean_observed = observed.iter().sum::<f64>() / observed.len() as f64;
    assert!(
        posterior.mean < mean_observed,
        "predicted {} at the candidate, average observed {}",
        posterior.mean,
        mean_observed
    );
}

#[tokio::test]
async fn learn_cycle_accumulates_valid_records() {
    let mut centers = HashMap::new();
    centers.insert("x1".to_string(), 1.0);
    centers.insert("x2".to_string(), -0.5);
    let beamline = SimulatedBeamline::new(centers, 2.0, 0.0, 3);

    let digester = FnDigester(|raw: &RawMeasurement| {
        let mut out = HashMap::new();
        out.insert("intensity".to_string(), raw.values.get("intensity").copied());
        out
    });

    let mut agent = Agent::builder()
        .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
        .dof(DegreeOfFreedom::continuous("x2", -6.0, 6.0))
        .objective(Objective::maximize("intensity"))
        .config(
            AgentConfig::default()
                .with_seed(3)
                .with_execution_timeout_secs(30),
        )
        .executor(Arc::new(beamline))
        .digester(Arc::new(digester))
        .build()
        .unwrap();

    let report = agent.learn("expected-improvement", 2, 4).await.unwrap();
    assert_eq!(report.iterations.len(), 4);
    assert_eq!(report.records_added, 8);
    assert!(report.iterations.iter().all(|it| it.invalid_outcomes == 0));
    assert_eq!(agent.table().valid_count("intensity"), 8);

    // The first iteration had no data, so it must have fallen back.
    assert_eq!(
        agent.table().records()[0].batch_id,
        Some(report.iterations[0].batch_id)
    );

    let position = agent.position();
    let posterior = agent.predict("intensity", &position).unwrap();
    assert!(posterior.mean.is_finite());
    assert!(posterior.sigma >= 0.0);
}
