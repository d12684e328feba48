//! The ask/tell agent loop.
//!
//! One agent instance owns its data table, surrogates and configuration;
//! there is no process-wide current agent. Ask/tell take `&mut self`, so
//! iterations are serialized per instance; parallelism lives inside a
//! single Proposing step (model fits and optimizer restarts).

use chrono::{DateTime, Utc};
use ld_acquisition::{
    optimize_batch, order, quasi_random_batch, AcqParams, AcquisitionContext, AcquisitionKind,
    DomainMap, MovementMetric,
};
use ld_data::{decode_unit, encode_unit, DataTable, Record, RecordStore, TableSnapshot};
use ld_model::{ModelManager, ObjectiveModel, Posterior};
use ld_types::{
    config_error, AgentConfig, DegreeOfFreedom, DofSet, DofValue, LdError, LdResult, Objective,
};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::execution::{Digester, Executor, RawMeasurement};

/// Where the loop currently is. Failed is sticky only for the iteration
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Idle,
    Proposing,
    AwaitingExecution,
    Digesting,
    Recording,
    Failed,
}

/// A batch of proposed input configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub batch_id: Uuid,
    pub acquisition: String,
    /// One input vector per point, over every writable DOF.
    pub points: Vec<HashMap<String, DofValue>>,
    /// Whether the points were reordered by the route planner.
    pub routed: bool,
    pub created_at: DateTime<Utc>,
}

/// Externally obtained data handed to tell().
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub inputs: HashMap<String, DofValue>,
    pub outcomes: HashMap<String, Option<f64>>,
}

/// Per-iteration outcome of a learn() run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationOutcome {
    pub iteration: usize,
    pub batch_id: Uuid,
    pub proposed: usize,
    pub invalid_outcomes: usize,
    pub quasi_random_fallback: bool,
}

/// Summary of a completed learn() run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LearnReport {
    pub iterations: Vec<IterationOutcome>,
    pub records_added: usize,
}

/// Builder for a configured agent.
#[derive(Default)]
pub struct AgentBuilder {
    dofs: Vec<DegreeOfFreedom>,
    objectives: Vec<Objective>,
    config: AgentConfig,
    executor: Option<Arc<dyn Executor>>,
    digester: Option<Arc<dyn Digester>>,
    store: Option<Arc<dyn RecordStore>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            dofs: Vec::new(),
            objectives: Vec::new(),
            config: AgentConfig::default(),
            executor: None,
            digester: None,
            store: None,
        }
    }

    pub fn dof(mut self, dof: DegreeOfFreedom) -> Self {
        self.dofs.push(dof);
        self
    }

    pub fn dofs(mut self, dofs: Vec<DegreeOfFreedom>) -> Self {
        self.dofs.extend(dofs);
        self
    }

    pub fn objective(mut self, objective: Objective) -> Self {
        self.objectives.push(objective);
        self
    }

    pub fn objectives(mut self, objectives: Vec<Objective>) -> Self {
        self.objectives.extend(objectives);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn digester(mut self, digester: Arc<dyn Digester>) -> Self {
        self.digester = Some(digester);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> LdResult<Agent> {
        if self.dofs.is_empty() {
            return Err(config_error!("An agent needs at least one DOF"));
        }
        if self.objectives.is_empty() {
            return Err(config_error!("An agent needs at least one objective"));
        }
        let dofs = DofSet::new(self.dofs)?;
        for (i, objective) in self.objectives.iter().enumerate() {
            if self.objectives[..i].iter().any(|o| o.name == objective.name) {
                return Err(config_error!("Duplicate objective name: {}", objective.name));
            }
            if dofs.get(&objective.name).is_some() {
                return Err(config_error!(
                    "Name '{}' is both a DOF and an objective",
                    objective.name
                ));
            }
        }
        let table = DataTable::new(&dofs, &self.objectives);
        Ok(Agent {
            dofs,
            objectives: self.objectives,
            config: self.config,
            table,
            models: ModelManager::new(),
            executor: self.executor,
            digester: self.digester,
            store: self.store,
            state: LoopState::Idle,
            draw_counter: 0,
        })
    }
}

/// The optimization agent: owns the data table, the surrogate manager and
/// the acquisition machinery, and orchestrates the ask → execute → digest →
/// record cycle.
pub struct Agent {
    dofs: DofSet,
    objectives: Vec<Objective>,
    config: AgentConfig,
    table: DataTable,
    models: ModelManager,
    executor: Option<Arc<dyn Executor>>,
    digester: Option<Arc<dyn Digester>>,
    store: Option<Arc<dyn RecordStore>>,
    state: LoopState,
    /// Advances every stochastic draw so repeated quasi-random asks and
    /// optimizer runs decorrelate while staying reproducible per seed.
    draw_counter: u64,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("dofs", &self.dofs)
            .field("objectives", &self.objectives)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("draw_counter", &self.draw_counter)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn dofs(&self) -> &DofSet {
        &self.dofs
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    /// Toggle a DOF's participation in acquisition between iterations.
    pub fn set_dof_active(&mut self, name: &str, active: bool) -> LdResult<()> {
        self.dofs.set_active(name, active)
    }

    /// Reload previously persisted records into the table.
    pub async fn restore_history(&mut self) -> LdResult<usize> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => return Ok(0),
        };
        let records = store.load_all().await?;
        let count = records.len();
        for record in records {
            self.table.append(record)?;
        }
        info!(records = count, "restored history");
        Ok(count)
    }

    /// The current position: the most recently recorded value of every
    /// DOF, falling back to domain defaults before any data exists.
    pub fn position(&self) -> HashMap<String, DofValue> {
        self.dofs
            .iter()
            .map(|dof| {
                let value = self
                    .table
                    .last_input(&dof.name)
                    .cloned()
                    .unwrap_or_else(|| dof.default_value());
                (dof.name.clone(), value)
            })
            .collect()
    }

    /// Propose `n` candidate input configurations using the named
    /// acquisition strategy. Performs exactly one Proposing step; nothing
    /// is executed or recorded.
    ///
    /// With fewer valid records than the surrogate needs, model-based
    /// strategies fall back to quasi-random sampling instead of failing.
    pub fn ask(&mut self, strategy: &str, n: usize) -> LdResult<Proposal> {
        self.state = LoopState::Proposing;
        let result = self.propose(strategy, n);
        self.state = match result {
            Ok(_) => LoopState::Idle,
            Err(_) => LoopState::Failed,
        };
        result
    }

    fn propose(&mut self, strategy: &str, n: usize) -> LdResult<Proposal> {
        if n == 0 {
            return Err(config_error!("Batch size must be at least 1"));
        }
        let mut kind = AcquisitionKind::parse(strategy)?;
        let extremized = self.objectives.iter().filter(|o| o.is_extremized()).count();
        // Several extremized objectives force the hypervolume criterion.
        if extremized > 1
            && matches!(
                kind,
                AcquisitionKind::ExpectedImprovement | AcquisitionKind::UpperConfidenceBound
            )
        {
            debug!(from = kind.key(), "switching to hypervolume-improvement");
            kind = AcquisitionKind::HypervolumeImprovement;
        }

        let map = self.domain_map()?;
        let snapshot = TableSnapshot::build(&self.table, &self.dofs, &self.objectives)?;

        let mut fallback = false;
        let unit_points = if kind == AcquisitionKind::QuasiRandom {
            self.quasi_random(&map, n)
        } else {
            let acq_seed = self.next_draw();
            let opt_seed = self.next_draw();
            let fitted = self.models.ensure_fresh(&snapshot, &self.objectives);
            match fitted {
                Ok(bundle) => {
                    let params = AcqParams {
                        ucb_beta: self.config.ucb_beta,
                        hv_samples: self.config.hypervolume_samples,
                        seed: acq_seed,
                    };
                    let ctx =
                        AcquisitionContext::new(kind, &bundle, &self.objectives, &snapshot, &params)?;
                    optimize_batch(&ctx, &map, n, self.config.optimizer_restarts, opt_seed)?
                }
                Err(LdError::InsufficientData { have, need }) => {
                    warn!(have, need, "not enough data for surrogates; sampling quasi-randomly");
                    fallback = true;
                    self.quasi_random(&map, n)
                }
                Err(e) => return Err(e),
            }
        };

        let mut points = unit_points;
        let mut routed = false;
        if self.config.route && points.len() > 1 {
            let start = self.position_units()?;
            let route = order(&points, &start, &MovementMetric::default());
            points = route.into_iter().map(|i| points[i].clone()).collect();
            routed = true;
        }

        let proposal = Proposal {
            batch_id: Uuid::new_v4(),
            acquisition: if fallback {
                AcquisitionKind::QuasiRandom.key().to_string()
            } else {
                kind.key().to_string()
            },
            points: points
                .iter()
                .map(|unit| self.decode_writable(unit))
                .collect(),
            routed,
            created_at: Utc::now(),
        };
        info!(
            batch = %proposal.batch_id,
            points = proposal.points.len(),
            acquisition = proposal.acquisition.as_str(),
            "proposed batch"
        );
        Ok(proposal)
    }

    /// Record externally obtained observations. Never deduplicates;
    /// identical observations are stored verbatim as separate records.
    pub async fn tell(&mut self, observations: Vec<Observation>) -> LdResult<usize> {
        self.tell_with_batch(observations, None).await
    }

    async fn tell_with_batch(
        &mut self,
        observations: Vec<Observation>,
        batch_id: Option<Uuid>,
    ) -> LdResult<usize> {
        self.state = LoopState::Recording;
        let mut appended = 0;
        for observation in observations {
            let mut inputs = observation.inputs;
            // Unwritten DOFs (read-only drift, inactive axes) still need an
            // entry in every record; pin them to the current position.
            for (name, value) in self.position() {
                inputs.entry(name).or_insert(value);
            }
            let mut record = Record::new(inputs, observation.outcomes);
            if let Some(batch_id) = batch_id {
                record = record.with_batch(batch_id);
            }
            self.table.append(record.clone())?;
            if let Some(store) = &self.store {
                store.append(&record).await?;
            }
            appended += 1;
        }
        self.state = LoopState::Idle;
        debug!(appended, total = self.table.len(), "recorded observations");
        Ok(appended)
    }

    /// Raw-space posterior for one objective at an arbitrary input point.
    pub fn predict(
        &mut self,
        objective: &str,
        inputs: &HashMap<String, DofValue>,
    ) -> LdResult<Posterior> {
        let snapshot = TableSnapshot::build(&self.table, &self.dofs, &self.objectives)?;
        let bundle = self.models.ensure_fresh(&snapshot, &self.objectives)?;
        let model: &ObjectiveModel = bundle
            .get(objective)
            .ok_or_else(|| config_error!("No such objective: {objective}"))?;
        let query = self.encode_point(inputs)?;
        Ok(model.predict_raw(query.view()))
    }

    /// Run `iterations` full ask → execute → digest → record cycles.
    ///
    /// Execution failures and timeouts are recorded as invalid outcomes and
    /// the loop continues. Proposing failures abort unless the agent is
    /// configured to tolerate them, in which case the iteration falls back
    /// to quasi-random sampling. Digestion schema mismatches always abort.
    pub async fn learn(
        &mut self,
        strategy: &str,
        n: usize,
        iterations: usize,
    ) -> LdResult<LearnReport> {
        let executor = self
            .executor
            .clone()
            .ok_or_else(|| config_error!("learn() needs an executor"))?;
        let digester = self
            .digester
            .clone()
            .ok_or_else(|| config_error!("learn() needs a digester"))?;

        let mut report = LearnReport::default();
        for iteration in 0..iterations {
            let mut fallback = false;
            let proposal = match self.ask(strategy, n) {
                Ok(proposal) => proposal,
                Err(e) if e.is_transient() && self.config.tolerate_acquisition_errors => {
                    warn!(iteration, error = %e, "acquisition failed; falling back to quasi-random");
                    fallback = true;
                    self.ask(AcquisitionKind::QuasiRandom.key(), n)
                        .map_err(|e| self.fail(iteration, e))?
                }
                Err(e) => return Err(self.fail(iteration, e)),
            };

            self.state = LoopState::AwaitingExecution;
            let position = self.position();
            let raws = match self
                .execute_with_timeout(executor.as_ref(), &proposal.points, &position)
                .await
            {
                Ok(raws) if raws.len() == proposal.points.len() => raws,
                Ok(raws) => {
                    return Err(self.fail(
                        iteration,
                        LdError::ExecutionFailure {
                            message: format!(
                                "executor returned {} measurements for {} points",
                                raws.len(),
                                proposal.points.len()
                            ),
                        },
                    ))
                }
                Err(e) => {
                    // Timeout or wholesale failure: the batch is recorded as
                    // invalid data and the loop moves on.
                    warn!(iteration, error = %e, "execution failed; recording invalid outcomes");
                    vec![RawMeasurement::failure(e.to_string()); proposal.points.len()]
                }
            };

            self.state = LoopState::Digesting;
            let digested = match digester.digest(&raws) {
                Ok(digested) if digested.len() == raws.len() => digested,
                Ok(digested) => {
                    return Err(self.fail(
                        iteration,
                        LdError::Digestion {
                            message: format!(
                                "digestion returned {} rows for {} measurements",
                                digested.len(),
                                raws.len()
                            ),
                        },
                    ))
                }
                Err(e) => return Err(self.fail(iteration, e)),
            };

            let mut invalid = 0;
            let mut observations = Vec::with_capacity(proposal.points.len());
            for ((point, raw), digest) in proposal.points.iter().zip(&raws).zip(digested) {
                let outcomes = match self.validate_outcomes(raw, digest) {
                    Ok(outcomes) => outcomes,
                    Err(e) => return Err(self.fail(iteration, e)),
                };
                if outcomes.values().all(|v| v.is_none()) {
                    invalid += 1;
                }
                let mut inputs = point.clone();
                // Prefer the readback for read-only DOFs when the raw
                // measurement reports one.
                for dof in self.dofs.iter().filter(|d| d.read_only) {
                    if let Some(v) = raw.values.get(&dof.name) {
                        inputs.insert(dof.name.clone(), DofValue::Float(*v));
                    }
                }
                observations.push(Observation { inputs, outcomes });
            }

            self.tell_with_batch(observations, Some(proposal.batch_id))
                .await?;
            report.records_added += proposal.points.len();
            report.iterations.push(IterationOutcome {
                iteration,
                batch_id: proposal.batch_id,
                proposed: proposal.points.len(),
                invalid_outcomes: invalid,
                quasi_random_fallback: fallback,
            });
            info!(iteration, invalid, "learn iteration complete");
        }
        Ok(report)
    }

    // ----- internals -----

    fn fail(&mut self, iteration: usize, error: LdError) -> LdError {
        self.state = LoopState::Failed;
        warn!(iteration, error = %error, "learn aborted");
        error
    }

    async fn execute_with_timeout(
        &self,
        executor: &dyn Executor,
        points: &[HashMap<String, DofValue>],
        position: &HashMap<String, DofValue>,
    ) -> LdResult<Vec<RawMeasurement>> {
        match self.config.execution_timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(
                    Duration::from_secs(secs),
                    executor.execute(points, position),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LdError::ExecutionTimeout { timeout_secs: secs }),
                }
            }
            None => executor.execute(points, position).await,
        }
    }

    /// Check one digested row against the declared objective schema.
    /// Unknown names are a structural mismatch; missing names and NaN are
    /// invalid values. Failed measurements are invalid wholesale.
    fn validate_outcomes(
        &self,
        raw: &RawMeasurement,
        digest: HashMap<String, Option<f64>>,
    ) -> LdResult<HashMap<String, Option<f64>>> {
        for name in digest.keys() {
            if !self.objectives.iter().any(|o| &o.name == name) {
                return Err(LdError::Digestion {
                    message: format!("digestion produced undeclared objective '{name}'"),
                });
            }
        }
        let mut outcomes = HashMap::with_capacity(self.objectives.len());
        for objective in &self.objectives {
            let value = if raw.ok {
                digest
                    .get(&objective.name)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
            } else {
                None
            };
            outcomes.insert(objective.name.clone(), value);
        }
        Ok(outcomes)
    }

    fn next_draw(&mut self) -> u64 {
        self.draw_counter += 1;
        self.config
            .seed
            .unwrap_or(0)
            .wrapping_add(self.draw_counter.wrapping_mul(0x9e37_79b9))
    }

    fn quasi_random(&mut self, map: &DomainMap, n: usize) -> Vec<Array1<f64>> {
        let offset = self.draw_counter.wrapping_mul(n as u64);
        self.draw_counter += 1;
        quasi_random_batch(map, n, offset)
    }

    /// Unit-cube template over all DOFs (current position) plus the active
    /// index set. Errors with `EmptyDomain` when nothing is active.
    fn domain_map(&self) -> LdResult<DomainMap> {
        let template = self.position_units()?;
        let active_idx: Vec<usize> = self
            .dofs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.active && !d.read_only)
            .map(|(i, _)| i)
            .collect();
        DomainMap::new(template, active_idx)
    }

    fn position_units(&self) -> LdResult<Array1<f64>> {
        let position = self.position();
        self.encode_point(&position)
    }

    fn encode_point(&self, inputs: &HashMap<String, DofValue>) -> LdResult<Array1<f64>> {
        let mut units = Vec::with_capacity(self.dofs.len());
        for dof in self.dofs.iter() {
            let value = inputs
                .get(&dof.name)
                .cloned()
                .or_else(|| self.table.last_input(&dof.name).cloned())
                .unwrap_or_else(|| dof.default_value());
            units.push(encode_unit(dof, &value)?);
        }
        Ok(Array1::from_vec(units))
    }

    /// Decode a full unit vector into concrete values for every writable
    /// DOF. Read-only DOFs are omitted: the agent never writes them.
    fn decode_writable(&self, unit: &Array1<f64>) -> HashMap<String, DofValue> {
        self.dofs
            .iter()
            .enumerate()
            .filter(|(_, dof)| !dof.read_only)
            .map(|(i, dof)| (dof.name.clone(), decode_unit(dof, unit[i])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Executor;
    use crate::sim::SimulatedBeamline;
    use async_trait::async_trait;
    use crate::execution::FnDigester;

    fn two_dof_agent() -> Agent {
        Agent::builder()
            .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
            .dof(DegreeOfFreedom::continuous("x2", -6.0, 6.0))
            .objective(Objective::minimize("f"))
            .config(AgentConfig::default().with_seed(11))
            .build()
            .unwrap()
    }

    fn observation(x1: f64, x2: f64, f: Option<f64>) -> Observation {
        let mut inputs = HashMap::new();
        inputs.insert("x1".to_string(), DofValue::Float(x1));
        inputs.insert("x2".to_string(), DofValue::Float(x2));
        let mut outcomes = HashMap::new();
        outcomes.insert("f".to_string(), f);
        Observation { inputs, outcomes }
    }

    fn in_domain(agent: &Agent, point: &HashMap<String, DofValue>) {
        for dof in agent.dofs().iter().filter(|d| !d.read_only) {
            let value = point.get(&dof.name).expect("writable DOF missing");
            assert!(dof.search_domain.contains(value), "{} out of domain", dof.name);
        }
    }

    struct NoBeam;

    #[async_trait]
    impl Executor for NoBeam {
        async fn execute(
            &self,
            _batch: &[HashMap<String, DofValue>],
            _position: &HashMap<String, DofValue>,
        ) -> LdResult<Vec<RawMeasurement>> {
            Err(LdError::ExecutionFailure {
                message: "shutter closed".to_string(),
            })
        }
    }

    #[test]
    fn builder_rejects_duplicate_objectives() {
        let err = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x", 0.0, 1.0))
            .objective(Objective::minimize("f"))
            .objective(Objective::maximize("f"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LdError::Config(_)));
    }

    #[test]
    fn builder_rejects_dof_objective_name_collision() {
        let err = Agent::builder()
            .dof(DegreeOfFreedom::continuous("f", 0.0, 1.0))
            .objective(Objective::minimize("f"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LdError::Config(_)));
    }

    #[test]
    fn builder_requires_dofs_and_objectives() {
        assert!(Agent::builder().objective(Objective::minimize("f")).build().is_err());
        assert!(Agent::builder()
            .dof(DegreeOfFreedom::continuous("x", 0.0, 1.0))
            .build()
            .is_err());
    }

    #[test]
    fn quasi_random_ask_stays_in_domain() {
        let mut agent = two_dof_agent();
        let proposal = agent.ask("quasi-random", 1).unwrap();
        assert_eq!(proposal.points.len(), 1);
        assert_eq!(agent.state(), LoopState::Idle);
        in_domain(&agent, &proposal.points[0]);
    }

    #[test]
    fn batch_points_are_distinct() {
        let mut agent = two_dof_agent();
        let proposal = agent.ask("quasi-random", 4).unwrap();
        assert_eq!(proposal.points.len(), 4);
        assert!(proposal.routed);
        for i in 0..4 {
            in_domain(&agent, &proposal.points[i]);
            for j in (i + 1)..4 {
                assert_ne!(proposal.points[i], proposal.points[j]);
            }
        }
    }

    #[tokio::test]
    async fn model_based_ask_falls_back_with_one_record() {
        let mut agent = two_dof_agent();
        agent.tell(vec![observation(0.0, 0.0, Some(1.0))]).await.unwrap();
        let proposal = agent.ask("expected-improvement", 2).unwrap();
        assert_eq!(proposal.acquisition, "quasi-random");
        assert_eq!(proposal.points.len(), 2);
    }

    #[tokio::test]
    async fn model_based_ask_with_enough_records() {
        let mut agent = two_dof_agent();
        let mut observations = Vec::new();
        for (x1, x2) in [(-4.0, -4.0), (-2.0, 1.0), (0.0, 3.0), (2.0, -1.0), (4.0, 4.0)] {
            let f = (x1 - 2.0f64).powi(2) + (x2 - 3.0f64).powi(2);
            observations.push(observation(x1, x2, Some(f)));
        }
        agent.tell(observations).await.unwrap();
        let proposal = agent.ask("expected-improvement", 1).unwrap();
        assert_eq!(proposal.acquisition, "expected-improvement");
        in_domain(&agent, &proposal.points[0]);
    }

    #[tokio::test]
    async fn tell_keeps_duplicates_verbatim() {
        let mut agent = two_dof_agent();
        let obs = observation(1.0, 2.0, Some(5.0));
        agent.tell(vec![obs.clone(), obs]).await.unwrap();
        assert_eq!(agent.table().len(), 2);
    }

    #[tokio::test]
    async fn deactivated_dof_is_pinned_across_the_batch() {
        let mut agent = two_dof_agent();
        agent.tell(vec![observation(0.0, 1.5, Some(2.0))]).await.unwrap();
        agent.set_dof_active("x2", false).unwrap();
        let proposal = agent.ask("quasi-random", 3).unwrap();
        for point in &proposal.points {
            assert_eq!(point["x2"], DofValue::Float(1.5));
        }
    }

    #[tokio::test]
    async fn multi_objective_upgrades_to_hypervolume() {
        let mut agent = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x", 0.0, 1.0))
            .objective(Objective::minimize("f"))
            .objective(Objective::maximize("g"))
            .config(AgentConfig::default().with_seed(3))
            .build()
            .unwrap();
        for i in 0..5 {
            let x = i as f64 / 4.0;
            let mut inputs = HashMap::new();
            inputs.insert("x".to_string(), DofValue::Float(x));
            let mut outcomes = HashMap::new();
            outcomes.insert("f".to_string(), Some(x * x));
            outcomes.insert("g".to_string(), Some(x));
            agent.tell(vec![Observation { inputs, outcomes }]).await.unwrap();
        }
        let proposal = agent.ask("expected-improvement", 1).unwrap();
        assert_eq!(proposal.acquisition, "hypervolume-improvement");
    }

    #[tokio::test]
    async fn execution_failure_records_invalid_outcomes_and_continues() {
        let digester = FnDigester(|raw: &RawMeasurement| {
            let mut out = HashMap::new();
            out.insert("f".to_string(), raw.values.get("intensity").copied());
            out
        });
        let mut agent = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
            .objective(Objective::minimize("f"))
            .config(AgentConfig::default().with_seed(5))
            .executor(Arc::new(NoBeam))
            .digester(Arc::new(digester))
            .build()
            .unwrap();

        let report = agent.learn("quasi-random", 2, 2).await.unwrap();
        assert_eq!(report.iterations.len(), 2);
        assert_eq!(report.records_added, 4);
        assert!(report.iterations.iter().all(|it| it.invalid_outcomes == 2));
        assert_eq!(agent.table().len(), 4);
        // Invalid records never count as training data.
        assert_eq!(agent.table().valid_count("f"), 0);
    }

    #[tokio::test]
    async fn undeclared_digestion_name_aborts() {
        let beamline = SimulatedBeamline::new(HashMap::new(), 1.0, 0.0, 0);
        let digester = FnDigester(|_: &RawMeasurement| {
            let mut out = HashMap::new();
            out.insert("not_an_objective".to_string(), Some(1.0));
            out
        });
        let mut agent = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
            .objective(Objective::minimize("f"))
            .executor(Arc::new(beamline))
            .digester(Arc::new(digester))
            .build()
            .unwrap();

        let err = agent.learn("quasi-random", 1, 1).await.unwrap_err();
        assert!(matches!(err, LdError::Digestion { .. }));
        assert_eq!(agent.state(), LoopState::Failed);
        assert_eq!(agent.table().len(), 0);
    }

    #[tokio::test]
    async fn history_restores_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ld_data::JsonlStore::new(dir.path().join("history.jsonl")).unwrap());

        let mut agent = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
            .dof(DegreeOfFreedom::continuous("x2", -6.0, 6.0))
            .objective(Objective::minimize("f"))
            .store(store.clone())
            .build()
            .unwrap();
        agent
            .tell(vec![observation(1.0, 2.0, Some(5.0)), observation(-3.0, 0.5, None)])
            .await
            .unwrap();

        let mut restored = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
            .dof(DegreeOfFreedom::continuous("x2", -6.0, 6.0))
            .objective(Objective::minimize("f"))
            .store(store)
            .build()
            .unwrap();
        assert_eq!(restored.restore_history().await.unwrap(), 2);
        assert_eq!(restored.table().len(), 2);
        assert_eq!(restored.table().valid_count("f"), 1);
        assert_eq!(
            restored.position()["x1"],
            DofValue::Float(-3.0)
        );
    }

    #[tokio::test]
    async fn learn_records_batch_ids() {
        let mut centers = HashMap::new();
        centers.insert("x1".to_string(), 0.0);
        let beamline = SimulatedBeamline::new(centers, 2.0, 0.0, 1);
        let digester = FnDigester(|raw: &RawMeasurement| {
            let mut out = HashMap::new();
            out.insert("intensity".to_string(), raw.values.get("intensity").copied());
            out
        });
        let mut agent = Agent::builder()
            .dof(DegreeOfFreedom::continuous("x1", -6.0, 6.0))
            .objective(Objective::maximize("intensity"))
            .config(AgentConfig::default().with_seed(2))
            .executor(Arc::new(beamline))
            .digester(Arc::new(digester))
            .build()
            .unwrap();

        let report = agent.learn("quasi-random", 2, 1).await.unwrap();
        let batch_id = report.iterations[0].batch_id;
        assert!(agent
            .table()
            .records()
            .iter()
            .all(|r| r.batch_id == Some(batch_id)));
    }
}
