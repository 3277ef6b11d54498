//! Container churn simulator
//!
//! Drives one Type Container through random provider arrivals and
//! departures, instance creation, disposal, stop, start and
//! reconfiguration, checking container invariants after every operation.

use super::StubProvider;
use crate::config::{Configuration, Value, INSTANCE_NAME};
use crate::error::ContainerError;
use crate::factory::{ComponentFactory, FactoryStateListener};
use crate::metadata::{ComponentMetadata, Element, HandlerName};
use crate::provider::ProviderRef;
use crate::registry::InMemoryRegistry;
use crate::types::{FactoryState, InstanceState};
use dcc_naming::NameRegistry;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Total operations to execute
    pub total_operations: u64,
    /// Number of handlers the simulated type requires
    pub requirements: usize,
    /// Pool of explicit instance names; collisions are expected to fail
    pub named_pool: usize,
    /// Stop conditions
    pub stop_on_first_violation: bool,
    pub stop_on_error_count: Option<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_operations: 10_000,
            requirements: 3,
            named_pool: 4,
            stop_on_first_violation: true,
            stop_on_error_count: None,
        }
    }
}

/// All operations the simulator can generate
#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    RegisterProvider { kind: usize, level: Option<i32> },
    UnregisterProvider { kind: usize },
    CreateInstance { name: Option<String> },
    CreateMalformed,
    DisposeInstance { name: String },
    StopInstance { name: String },
    StartInstance { name: String },
    ReconfigureInstance { name: String },
    ReconfigureUnknown,
    RestartFactory,
}

/// Expected result classification for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedResult {
    ShouldSucceed,
    ShouldFail,
}

/// A violation detected during simulation
#[derive(Debug, Clone)]
pub enum Violation {
    /// Operation outcome didn't match expectation
    UnexpectedOutcome {
        operation_index: u64,
        operation: SimulatedOperation,
        expected: ExpectedResult,
        actual: Result<String, String>,
    },
    /// Invariant was violated
    Invariant(InvariantViolation),
}

/// A specific invariant violation
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub check: InvariantCheck,
    pub details: String,
}

/// Types of invariant checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantCheck {
    // Type Container
    ValidityMatchesPublishedProviders,
    DescriptionPresentWhenValid,
    NoInstancesWhileInvalid,

    // Instances
    InstancesInLiveState,

    // Naming
    NamesMatchInstances,

    // Providers
    LeasesBalanced,
}

/// Statistics collected during simulation
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub factory_transitions: u64,
    pub operations_by_type: HashMap<String, u64>,
}

impl OperationStats {
    pub fn record(&mut self, operation: &SimulatedOperation, result: &Result<String, String>) {
        self.total_operations += 1;

        let type_name = format!("{operation:?}")
            .split([' ', '{'])
            .next()
            .unwrap_or("Unknown")
            .to_string();
        *self.operations_by_type.entry(type_name).or_insert(0) += 1;

        match result {
            Ok(_) => self.successful_operations += 1,
            Err(_) => self.failed_operations += 1,
        }
    }
}

/// Final report from the simulator
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: OperationStats,
    pub violations: Vec<Violation>,
    pub final_instance_count: usize,
    pub final_provider_count: usize,
    pub final_state: FactoryState,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== DCC Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Requirements: {}\n", self.config.requirements));
        report.push_str(&format!("Total Operations: {}\n", self.stats.total_operations));
        report.push_str(&format!("Successful: {}\n", self.stats.successful_operations));
        report.push_str(&format!("Failed: {}\n", self.stats.failed_operations));
        report.push_str(&format!("Factory Transitions: {}\n", self.stats.factory_transitions));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));
        report.push_str(&format!("Final State: {}\n", self.final_state));
        report.push_str(&format!("Final Instances: {}\n", self.final_instance_count));
        report.push_str(&format!("Final Providers: {}\n", self.final_provider_count));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }
}

#[derive(Default)]
struct TransitionCounter(AtomicU64);

impl FactoryStateListener for TransitionCounter {
    fn state_changed(&self, _factory: &ComponentFactory, _state: FactoryState) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Simulated world: one Type Container, its registry and the providers
/// published so far
struct World {
    registry: Arc<InMemoryRegistry>,
    names: Arc<NameRegistry>,
    factory: Arc<ComponentFactory>,
    kinds: Vec<HandlerName>,
    published: Vec<Vec<ProviderRef>>,
    withdrawn: Vec<ProviderRef>,
}

impl World {
    fn new(requirements: usize) -> Result<Self, ContainerError> {
        let kinds: Vec<HandlerName> = (0..requirements.max(1)).map(|i| HandlerName::new(format!("h{i}"))).collect();

        let mut metadata = ComponentMetadata::new("sim.Component")
            .with_attribute("name", "sim")
            .with_attribute("architecture", "false")
            .with_attribute("immediate", "false");
        for kind in &kinds {
            metadata = metadata.with_element(Element::new(kind.name.clone()));
        }

        let registry = Arc::new(InMemoryRegistry::new());
        let names = Arc::new(NameRegistry::new());
        let factory = ComponentFactory::builder(metadata, registry.clone(), names.clone()).build()?;
        factory.start()?;

        Ok(Self {
            registry,
            names,
            factory,
            published: vec![Vec::new(); kinds.len()],
            kinds,
            withdrawn: Vec::new(),
        })
    }

    fn fully_published(&self) -> bool {
        self.published.iter().all(|p| !p.is_empty())
    }

    fn provider_count(&self) -> usize {
        self.published.iter().map(Vec::len).sum()
    }
}

/// Run the simulator
#[must_use]
pub fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = OperationStats::default();
    let mut violations = Vec::new();

    let mut world = match World::new(config.requirements) {
        Ok(world) => world,
        Err(e) => {
            violations.push(Violation::Invariant(InvariantViolation {
                check: InvariantCheck::ValidityMatchesPublishedProviders,
                details: format!("cannot set up the simulated type: {e}"),
            }));
            return SimulatorReport {
                config,
                stats,
                violations,
                final_instance_count: 0,
                final_provider_count: 0,
                final_state: FactoryState::Invalid,
            };
        }
    };

    let counter = Arc::new(TransitionCounter::default());
    world.factory.add_factory_state_listener(counter.clone());

    for i in 0..config.total_operations {
        let operation = generate_operation(&mut rng, &config, &world);
        let expected_result = classify_expected_result(&operation, &world);
        let actual_result = execute_operation(&operation, &mut world);

        let outcome_matches = matches!(
            (expected_result, &actual_result),
            (ExpectedResult::ShouldSucceed, Ok(_)) | (ExpectedResult::ShouldFail, Err(_))
        );

        if !outcome_matches {
            violations.push(Violation::UnexpectedOutcome {
                operation_index: i,
                operation: operation.clone(),
                expected: expected_result,
                actual: actual_result.clone(),
            });

            if config.stop_on_first_violation {
                break;
            }

            if let Some(max_errors) = config.stop_on_error_count {
                if violations.len() >= max_errors {
                    break;
                }
            }
        }

        if let Err(inv_violations) = ContainerInvariants::check_all(&world) {
            violations.extend(inv_violations.into_iter().map(Violation::Invariant));
            if config.stop_on_first_violation {
                break;
            }
        }

        stats.record(&operation, &actual_result);
    }

    stats.factory_transitions = counter.0.load(Ordering::Relaxed);

    let report = SimulatorReport {
        final_instance_count: world.factory.instance_count(),
        final_provider_count: world.provider_count(),
        final_state: world.factory.state(),
        config,
        stats,
        violations,
    };
    world.factory.dispose();
    report
}

/// Generate a random operation against the current world
fn generate_operation(rng: &mut StdRng, config: &SimulatorConfig, world: &World) -> SimulatedOperation {
    let live = world.factory.instance_names();
    let kinds = world.kinds.len();

    // favour provider churn until the type can turn valid
    if !world.fully_published() && rng.gen_bool(0.6) {
        let kind = rng.gen_range(0..kinds);
        return SimulatedOperation::RegisterProvider {
            kind,
            level: rng.gen_bool(0.3).then(|| rng.gen_range(0..10)),
        };
    }

    let pick_live = |rng: &mut StdRng| live[rng.gen_range(0..live.len())].clone();

    match rng.gen_range(0..100) {
        0..=9 => SimulatedOperation::RegisterProvider {
            kind: rng.gen_range(0..kinds),
            level: rng.gen_bool(0.3).then(|| rng.gen_range(0..10)),
        },
        10..=17 => SimulatedOperation::UnregisterProvider {
            kind: rng.gen_range(0..kinds),
        },
        18..=44 => {
            let name = (config.named_pool > 0 && rng.gen_bool(0.3))
                .then(|| format!("sim-named-{}", rng.gen_range(0..config.named_pool)));
            SimulatedOperation::CreateInstance { name }
        }
        45..=47 => SimulatedOperation::CreateMalformed,
        48..=49 => SimulatedOperation::ReconfigureUnknown,
        50 => SimulatedOperation::RestartFactory,
        _ if live.is_empty() => SimulatedOperation::CreateInstance { name: None },
        51..=64 => SimulatedOperation::DisposeInstance { name: pick_live(rng) },
        65..=76 => SimulatedOperation::StopInstance { name: pick_live(rng) },
        77..=88 => SimulatedOperation::StartInstance { name: pick_live(rng) },
        _ => SimulatedOperation::ReconfigureInstance { name: pick_live(rng) },
    }
}

fn classify_expected_result(operation: &SimulatedOperation, world: &World) -> ExpectedResult {
    use ExpectedResult::{ShouldFail, ShouldSucceed};

    match operation {
        SimulatedOperation::UnregisterProvider { kind } => {
            if world.published[*kind].is_empty() {
                ShouldFail
            } else {
                ShouldSucceed
            }
        }
        SimulatedOperation::CreateInstance { name } => {
            let valid = world.factory.state().is_valid();
            let free = name.as_deref().map_or(true, |n| !world.names.contains(n));
            if valid && free {
                ShouldSucceed
            } else {
                ShouldFail
            }
        }
        SimulatedOperation::CreateMalformed => ShouldFail,
        SimulatedOperation::RegisterProvider { .. }
        | SimulatedOperation::DisposeInstance { .. }
        | SimulatedOperation::StopInstance { .. }
        | SimulatedOperation::StartInstance { .. }
        | SimulatedOperation::ReconfigureInstance { .. }
        | SimulatedOperation::ReconfigureUnknown
        | SimulatedOperation::RestartFactory => ShouldSucceed,
    }
}

fn execute_operation(operation: &SimulatedOperation, world: &mut World) -> Result<String, String> {
    let factory = Arc::clone(&world.factory);
    let live = |name: &str| {
        factory
            .instance_by_name(name)
            .ok_or_else(|| format!("no instance {name}"))
    };

    match operation {
        SimulatedOperation::RegisterProvider { kind, level } => {
            let mut provider = StubProvider::new(&world.kinds[*kind]);
            if let Some(level) = level {
                provider = provider.with_level(*level);
            }
            let reference = world.registry.register(Arc::new(provider));
            world.published[*kind].push(reference.clone());
            Ok(format!("registered {}", reference.id()))
        }
        SimulatedOperation::UnregisterProvider { kind } => {
            let Some(reference) = world.published[*kind].pop() else {
                return Err(format!("no provider of kind {kind}"));
            };
            world.registry.unregister(reference.id()).ok_or("unknown provider")?;
            world.withdrawn.push(reference.clone());
            Ok(format!("unregistered {}", reference.id()))
        }
        SimulatedOperation::CreateInstance { name } => {
            let mut configuration = Configuration::new();
            if let Some(name) = name {
                configuration.set_instance_name(name.clone());
            }
            factory
                .create_component_instance(configuration)
                .map(|instance| instance.name().to_owned())
                .map_err(|e| e.to_string())
        }
        SimulatedOperation::CreateMalformed => factory
            .create_component_instance(Configuration::new().with(INSTANCE_NAME, Value::Int(7)))
            .map(|instance| instance.name().to_owned())
            .map_err(|e| e.to_string()),
        SimulatedOperation::DisposeInstance { name } => {
            live(name)?;
            factory.deleted(name);
            Ok(format!("disposed {name}"))
        }
        SimulatedOperation::StopInstance { name } => {
            live(name)?.stop();
            Ok(format!("stopped {name}"))
        }
        SimulatedOperation::StartInstance { name } => live(name)?
            .start()
            .map(|()| format!("started {name}"))
            .map_err(|e| e.to_string()),
        SimulatedOperation::ReconfigureInstance { name } => factory
            .reconfigure(&Configuration::new().with(INSTANCE_NAME, name.as_str()))
            .map(|()| format!("reconfigured {name}"))
            .map_err(|e| e.to_string()),
        SimulatedOperation::ReconfigureUnknown => factory
            .reconfigure(&Configuration::new().with(INSTANCE_NAME, "sim-ghost"))
            .map(|()| "ignored".to_owned())
            .map_err(|e| e.to_string()),
        SimulatedOperation::RestartFactory => factory
            .restart()
            .map(|()| "restarted".to_owned())
            .map_err(|e| e.to_string()),
    }
}

/// Container invariant checks
pub struct ContainerInvariants;

impl ContainerInvariants {
    fn check_all(world: &World) -> Result<(), Vec<InvariantViolation>> {
        let violations: Vec<InvariantViolation> = [
            Self::check_factory_invariants(world),
            Self::check_instance_invariants(world),
            Self::check_naming_invariants(world),
            Self::check_lease_invariants(world),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check_factory_invariants(world: &World) -> Result<(), InvariantViolation> {
        let factory = &world.factory;
        let valid = factory.state().is_valid();

        if valid != world.fully_published() {
            return Err(InvariantViolation {
                check: InvariantCheck::ValidityMatchesPublishedProviders,
                details: format!(
                    "state {} with missing handlers {:?}",
                    factory.state(),
                    factory.missing_handlers()
                ),
            });
        }
        if valid && factory.component_description().is_none() {
            return Err(InvariantViolation {
                check: InvariantCheck::DescriptionPresentWhenValid,
                details: "valid without a type description".to_owned(),
            });
        }
        if !valid && factory.instance_count() > 0 {
            return Err(InvariantViolation {
                check: InvariantCheck::NoInstancesWhileInvalid,
                details: format!("{} instances alive", factory.instance_count()),
            });
        }
        Ok(())
    }

    fn check_instance_invariants(world: &World) -> Result<(), InvariantViolation> {
        for name in world.factory.instance_names() {
            let Some(instance) = world.factory.instance_by_name(&name) else {
                continue;
            };
            let state = instance.state();
            if !matches!(state, InstanceState::Valid | InstanceState::Stopped) {
                return Err(InvariantViolation {
                    check: InvariantCheck::InstancesInLiveState,
                    details: format!("{name} is {state}"),
                });
            }
        }
        Ok(())
    }

    fn check_naming_invariants(world: &World) -> Result<(), InvariantViolation> {
        let reserved = world.names.len();
        let live = world.factory.instance_count();
        if reserved == live {
            Ok(())
        } else {
            Err(InvariantViolation {
                check: InvariantCheck::NamesMatchInstances,
                details: format!("{reserved} names reserved for {live} instances"),
            })
        }
    }

    /// Every bound provider is leased once by its requirement and once per
    /// live instance; nothing else holds a lease.
    fn check_lease_invariants(world: &World) -> Result<(), InvariantViolation> {
        let bound = world.factory.bound_providers();
        let instances = world.factory.instance_count();

        let all = world.published.iter().flatten().chain(world.withdrawn.iter());
        for provider in all {
            let expected = if bound.iter().any(|b| b.same(provider)) {
                1 + instances
            } else {
                0
            };
            if provider.usage_count() != expected {
                return Err(InvariantViolation {
                    check: InvariantCheck::LeasesBalanced,
                    details: format!(
                        "provider {} leased {} times, expected {expected}",
                        provider.id(),
                        provider.usage_count()
                    ),
                });
            }
        }
        Ok(())
    }
}
