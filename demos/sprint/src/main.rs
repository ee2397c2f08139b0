#![deny(unsafe_code)]
//! Sprint scenario demo binary.
//!
//! Runs a self-contained sprint end to end:
//! 1. A six-task delivery plan with a composite the policy splits live
//! 2. A roster of simulated workers with a mid-run join and departure
//! 3. A product-lead stakeholder who rebalances weights at timestep 6
//! 4. Per-preference rubrics plus a staged release gate at completion
//!
//! No external services required -- workers, stakeholder, and judge
//! all run on simulated backends. Artifacts land in target/sprint-run.

mod policy;

use std::collections::BTreeMap;
use std::sync::Arc;

use foreman_engine::{EngineConfig, SimulationEngine, TickReport};
use foreman_evaluation::{
    CodeScore, ContextItem, Criterion, EvaluationSuite, OnFailureAction, Rubric, RubricStage,
    RunCondition, StagedRubric,
};
use foreman_preferences::{
    Preference, PreferenceWeights, StakeholderAgent, StakeholderConfig, WeightUpdateMode,
    WeightUpdateRequest,
};
use foreman_roster::{AgentRegistry, SimulatedWorker, SimulatedWorkerConfig};
use foreman_types::{
    AgentId, AgentProfile, OutputSelection, RunState, Task, TaskId, TaskStatus, Workflow,
};

use policy::SprintPolicy;

// ── Scenario Constants ──────────────────────────────────────────────────

const SEED: u64 = 42;
const MAX_TIMESTEPS: u64 = 24;
const BUDGET: f64 = 900.0;

// ── Formatting Helpers ──────────────────────────────────────────────────

const BANNER: &str = r#"
 ╔═══════════════════════════════════════════════════════════════╗
 ║             Foreman  --  Sprint Scenario Demo                 ║
 ║                                                               ║
 ║   One controller policy, five simulated workers, a shifting   ║
 ║   stakeholder, and a staged release gate.                     ║
 ╚═══════════════════════════════════════════════════════════════╝
"#;

fn section(title: &str) {
    let width: usize = 60;
    let pad = width.saturating_sub(title.len() + 4);
    let left = pad / 2;
    let right = pad - left;
    println!();
    println!(" ┌{}┐", "─".repeat(width));
    println!(" │{}  {}  {}│", " ".repeat(left), title, " ".repeat(right));
    println!(" └{}┘", "─".repeat(width));
}

fn ok(msg: &str) {
    println!("   [OK]  {}", msg);
}

fn info(msg: &str) {
    println!("   [--]  {}", msg);
}

fn warn(msg: &str) {
    println!("   [!!]  {}", msg);
}

// ── Main ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    println!("{}", BANNER);

    if let Err(e) = run_sprint().await {
        eprintln!();
        eprintln!("   [FATAL]  Sprint demo failed: {}", e);
        std::process::exit(1);
    }

    println!();
    println!(" ════════════════════════════════════════════════════════════════");
    println!("  Sprint demo complete.");
    println!(" ════════════════════════════════════════════════════════════════");
    println!();
}

async fn run_sprint() -> anyhow::Result<()> {
    // ── Phase A: The Plan ───────────────────────────────────────────
    section("Phase A: The Plan");

    let workflow = build_workflow()?;
    info(&format!("Goal: {}", workflow.goal));
    for constraint in &workflow.constraints {
        info(&format!("Constraint: {}", constraint));
    }
    let mut names: Vec<_> = workflow
        .tasks
        .values()
        .map(|t| format!("{} ({:.0}h)", t.name, t.estimated_duration_hours.unwrap_or(0.0)))
        .collect();
    names.sort();
    ok(&format!("{} tasks staged: {}", names.len(), names.join(", ")));

    // ── Phase B: The Roster ─────────────────────────────────────────
    section("Phase B: The Roster");

    let registry = build_roster()?;
    for agent in registry.agents() {
        let profile = agent.profile();
        info(&format!(
            "{:<4} ${:>3.0}/h  x{:.1} speed",
            profile.name, profile.cost_per_hour, profile.speed_factor
        ));
    }
    ok("Lee joins at t3 for the build push; Kit rotates off at t7");

    // ── Phase C: The Stakeholder ────────────────────────────────────
    section("Phase C: The Stakeholder");

    let stakeholder = build_stakeholder();
    info("Morgan (product lead): quality 0.50, speed 0.30, cost 0.20");
    info("At t6 the deadline moves up: speed jumps to 0.55");

    // ── Phase D: The Run ────────────────────────────────────────────
    section("Phase D: The Run");

    let config = EngineConfig::default()
        .with_max_timesteps(MAX_TIMESTEPS)
        .with_seed(SEED)
        .with_output_dir("target/sprint-run");

    let policy = SprintPolicy::new(TaskId::new("t-dashboard"))
        .with_preassigned(vec![TaskId::new("t-notes")]);

    let mut engine = SimulationEngine::new(config, workflow, Box::new(policy))?
        .with_registry(registry)
        .with_stakeholder(stakeholder)
        .with_suite(build_suite())?
        .with_callback(|report: &TickReport| {
            print_tick(report);
            Ok(())
        });

    let summary = engine.run().await?;

    // ── Phase E: The Outcome ────────────────────────────────────────
    section("Phase E: The Outcome");

    let line = format!(
        "{} after {} timesteps: {}/{} tasks done, ${:.2} spent, {:.1} simulated hours",
        summary.run_state,
        summary.timesteps_executed,
        summary.completed_tasks,
        summary.completed_tasks + summary.failed_tasks,
        summary.total_cost,
        summary.total_simulated_hours,
    );
    if summary.run_state == RunState::Completed {
        ok(&line);
    } else {
        warn(&line);
    }
    info(&format!(
        "Reward series over {} evaluations, most recent {:.3}",
        summary.reward_series.len(),
        summary.most_recent_reward,
    ));

    // ── Phase F: Final Evaluation ───────────────────────────────────
    section("Phase F: Final Evaluation");

    let Some(evaluation) = summary.final_evaluation.as_ref() else {
        warn("No completion evaluation was produced");
        return Ok(());
    };

    for score in evaluation.preference_scores.values() {
        info(&format!(
            "{:<8} score {:.3}  weight {:.2}",
            score.name, score.score, score.weight
        ));
    }
    info(&format!(
        "Weights in force: {}",
        serde_json::to_string(&evaluation.applied_weights)?
    ));
    ok(&format!(
        "Weighted preference total: {:.3}",
        evaluation.weighted_preference_total
    ));

    for outcome in &evaluation.staged_outcomes {
        println!();
        info(&format!(
            "{}: {:.1}/{:.1} ({} of {} stages passed)",
            outcome.category_name,
            outcome.total_score,
            outcome.max_score,
            outcome.stages_passed,
            outcome.stages_evaluated,
        ));
        for stage in &outcome.stages {
            let mark = if !stage.evaluated {
                "skip"
            } else if stage.passed {
                "pass"
            } else {
                "FAIL"
            };
            info(&format!(
                "  [{}] {:<16} {:.1}/{:.1}",
                mark, stage.name, stage.score, stage.max_points
            ));
        }
        if let Some(gate) = &outcome.failed_gate {
            warn(&format!("Gate failed at '{}'", gate));
        }
    }

    // ── Phase G: Release Notes Bake-off ─────────────────────────────
    section("Phase G: Release Notes Bake-off");

    let notes_id = TaskId::new("t-notes");
    let mut variants: Vec<_> = engine
        .workflow()
        .executions
        .values()
        .filter(|e| e.task_id == notes_id)
        .collect();
    variants.sort_by_key(|e| e.rank.unwrap_or(u32::MAX));
    for execution in &variants {
        let rank = execution
            .rank
            .map(|r| format!("#{}", r))
            .unwrap_or_else(|| "--".to_string());
        info(&format!(
            "{} {} scored {:.3} ({} kept)",
            rank,
            execution.agent_id,
            execution.aggregate_score.unwrap_or(0.0),
            if execution.output_resource_ids.is_empty() {
                "nothing"
            } else {
                "output"
            },
        ));
    }

    ok("Tick trace and summary written to target/sprint-run");
    Ok(())
}

fn print_tick(report: &TickReport) {
    let action = report
        .action
        .as_ref()
        .map(|record| record.action.kind.label())
        .unwrap_or("-");
    let reward = report
        .evaluation
        .as_ref()
        .map(|e| format!("{:.3}", e.weighted_preference_total))
        .unwrap_or_else(|| "  -  ".to_string());
    let done = report.status_counts.get("completed").copied().unwrap_or(0);
    println!(
        "   [t{:02}] {:<24} done {:>2}  ${:>7.2}  reward {}",
        report.timestep, action, done, report.total_cost, reward
    );
    for note in &report.roster_changes {
        println!("         roster: {}", note);
    }
    for change in &report.preference_changes {
        println!(
            "         weights: {}",
            change
                .new_weights
                .iter()
                .map(|(name, weight)| format!("{} {:.2}", name, weight))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

// ── Scenario Assembly ───────────────────────────────────────────────────

fn build_workflow() -> anyhow::Result<Workflow> {
    let mut workflow = Workflow::new(
        "v2 reporting dashboard",
        "Ship the v2 reporting dashboard with QA sign-off",
    )
    .with_seed(SEED)
    .with_constraints(vec![
        format!("total spend stays under ${:.0}", BUDGET),
        "QA runs after every build task".to_string(),
    ]);

    workflow.add_task(
        Task::new("write the spec", "one page: panels, filters, refresh cadence")
            .with_id(TaskId::new("t-spec"))
            .with_estimated_duration(2.0)
            .with_estimated_cost(90.0),
    )?;
    workflow.add_task(
        Task::new("design the schema", "reporting tables and rollup views")
            .with_id(TaskId::new("t-schema"))
            .with_dependencies(vec![TaskId::new("t-spec")])
            .with_estimated_duration(3.0)
            .with_estimated_cost(135.0),
    )?;
    workflow.add_task(
        Task::new("build the reporting api", "query endpoints over the new schema")
            .with_id(TaskId::new("t-api"))
            .with_dependencies(vec![TaskId::new("t-schema")])
            .with_estimated_duration(4.0)
            .with_estimated_cost(160.0),
    )?;
    workflow.add_task(
        Task::new("build the dashboard", "wireframe and build the reporting panels")
            .with_id(TaskId::new("t-dashboard"))
            .with_dependencies(vec![TaskId::new("t-schema")])
            .with_estimated_duration(6.0)
            .with_estimated_cost(240.0),
    )?;
    workflow.add_task(
        Task::new("regression pass", "exercise every panel against seeded data")
            .with_id(TaskId::new("t-qa"))
            .with_dependencies(vec![TaskId::new("t-api"), TaskId::new("t-dashboard")])
            .with_estimated_duration(3.0)
            .with_estimated_cost(90.0),
    )?;
    // Two writers compete on the notes; the "craft" rubric picks the keeper.
    workflow.add_task(
        Task::new("draft release notes", "what shipped, what moved, what to watch")
            .with_id(TaskId::new("t-notes"))
            .with_dependencies(vec![TaskId::new("t-spec")])
            .with_estimated_duration(1.0)
            .with_estimated_cost(40.0)
            .with_assigned_agent(AgentId::new("ana"))
            .with_assigned_agent(AgentId::new("raj"))
            .with_completion_evaluators(vec!["craft".to_string()])
            .with_output_selection(OutputSelection::Best),
    )?;

    Ok(workflow)
}

fn simulated(
    id: &str,
    name: &str,
    rate: f64,
    speed: f64,
    clarification_rate: f64,
    seed: u64,
) -> Arc<SimulatedWorker> {
    let profile = AgentProfile::ai_worker(name)
        .with_id(AgentId::new(id))
        .with_cost_per_hour(rate)
        .with_speed_factor(speed);
    let config = SimulatedWorkerConfig {
        success_rate: 1.0,
        clarification_rate,
        ..SimulatedWorkerConfig::default()
    };
    Arc::new(SimulatedWorker::new(profile).with_config(config).with_seed(seed))
}

fn build_roster() -> anyhow::Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();

    registry.register(simulated("ana", "Ana", 45.0, 1.3, 0.0, SEED + 1));
    registry.register(simulated("raj", "Raj", 30.0, 1.0, 0.25, SEED + 2));
    registry.register(simulated("sam", "Sam", 25.0, 0.9, 0.0, SEED + 3));
    registry.register(simulated("kit", "Kit", 28.0, 1.0, 0.0, SEED + 4));

    let lee = Arc::new(
        SimulatedWorker::new(
            AgentProfile::human_worker("Lee")
                .with_id(AgentId::new("lee"))
                .with_cost_per_hour(80.0),
        )
        .with_config(SimulatedWorkerConfig {
            success_rate: 1.0,
            ..SimulatedWorkerConfig::default()
        })
        .with_seed(SEED + 5),
    );
    registry.schedule_add(3, lee, "contract capacity for the build push")?;
    registry.schedule_remove(7, AgentId::new("kit"), "rotation onto the platform team")?;

    Ok(registry)
}

fn build_stakeholder() -> StakeholderAgent {
    let weights = PreferenceWeights::new(vec![
        Preference::new("quality", 0.5),
        Preference::new("speed", 0.3),
        Preference::new("cost", 0.2),
    ]);

    let config = StakeholderConfig::new(AgentId::new("morgan"), "Morgan", "product lead")
        .with_persona("pragmatic, hates surprises at the end of a sprint")
        .with_initial_preferences(weights)
        .with_push_probability(0.15)
        .with_suggestion_rate(0.6)
        .schedule_weight_update(WeightUpdateRequest::new(
            6,
            WeightUpdateMode::Absolute,
            BTreeMap::from([
                ("quality".to_string(), 0.25),
                ("speed".to_string(), 0.55),
                ("cost".to_string(), 0.20),
            ]),
        ));

    StakeholderAgent::new(config, SEED + 9)
}

fn build_suite() -> EvaluationSuite {
    let craft = Rubric::new("craft")
        .with_criterion(
            Criterion::judge(
                "reviewer take",
                "Rate how well the delivered artifacts serve the sprint goal",
            )
            .with_run_condition(RunCondition::Both),
        )
        .with_criterion(
            Criterion::code("clean completions", |workflow, _context| {
                let total = workflow.tasks.len().max(1);
                let failed = workflow
                    .tasks
                    .values()
                    .filter(|t| t.status == TaskStatus::Failed)
                    .count();
                Ok(CodeScore::new(1.0 - failed as f64 / total as f64))
            })
            .with_run_condition(RunCondition::Both),
        );

    let velocity = Rubric::new("velocity").with_criterion(
        Criterion::code("schedule pressure", |workflow, context| {
            if context.timestep == 0 {
                return Ok(CodeScore::new(0.0).with_reasoning("nothing can have landed yet"));
            }
            let expected = context.timestep as f64 / MAX_TIMESTEPS as f64;
            Ok(CodeScore::new((workflow.progress() / expected).clamp(0.0, 1.0)))
        })
        .with_run_condition(RunCondition::Both),
    );

    let budget = Rubric::new("budget").with_criterion(
        Criterion::code("burn rate", |workflow, _context| {
            Ok(
                CodeScore::new((1.0 - workflow.total_cost / BUDGET).clamp(0.0, 1.0))
                    .with_reasoning(format!("${:.2} of ${:.0} spent", workflow.total_cost, BUDGET)),
            )
        })
        .with_run_condition(RunCondition::Both),
    );

    let release_gate = StagedRubric::new("release gate", 20.0)
        .with_run_condition(RunCondition::OnCompletion)
        .with_stage(
            RubricStage::new("all work landed", 8.0)
                .with_rule(
                    Criterion::code("completed fraction", |workflow, _context| {
                        Ok(CodeScore::new(workflow.progress() * 8.0))
                    })
                    .with_max_score(8.0),
                )
                .with_min_score_to_pass(8.0),
        )
        .with_stage(
            RubricStage::new("under budget", 6.0)
                .with_rule(
                    Criterion::code("remaining budget", |workflow, _context| {
                        Ok(CodeScore::new(
                            ((1.0 - workflow.total_cost / BUDGET) * 6.0).clamp(0.0, 6.0),
                        ))
                    })
                    .with_max_score(6.0),
                )
                .with_min_score_to_pass(3.0)
                .with_on_failure(OnFailureAction::Continue),
        )
        .with_stage(
            RubricStage::new("team informed", 6.0).optional().with_rule(
                Criterion::code("controller broadcasts", |_workflow, context| {
                    let sent = context
                        .comms_by_sender
                        .iter()
                        .find(|digest| digest.sender_id == AgentId::new("manager"))
                        .map(|digest| digest.message_count)
                        .unwrap_or(0);
                    let score = match sent {
                        0 => 0.0,
                        1 => 3.0,
                        _ => 6.0,
                    };
                    Ok(CodeScore::new(score)
                        .with_reasoning(format!("{} update(s) from the controller", sent)))
                })
                .with_max_score(6.0)
                .requiring(ContextItem::CommsBySender),
            ),
        );

    EvaluationSuite::new()
        .for_preference("quality", craft)
        .for_preference("speed", velocity)
        .for_preference("cost", budget)
        .with_staged_rubric(release_gate)
}
