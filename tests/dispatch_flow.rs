// tests/dispatch_flow.rs
//
// Assignment under contention, timeout reassignment, and elimination gating.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};

use trend_missions::dispatch::{AssignmentPolicy, Completion, Dispatcher};
use trend_missions::error::{AssignError, MissionError};
use trend_missions::missions::{Mission, MissionBoard, MissionId, MissionKey, MissionStatus, Priority};
use trend_missions::registry::{AgentRegistry, TagOverlapScorer};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
}

fn add_mission(board: &MissionBoard, trend: &str, category: &str) -> MissionId {
    let key = MissionKey {
        trend: trend.into(),
        run_at: t0(),
        category: category.into(),
    };
    board
        .insert_if_absent(key, |id| Mission {
            id,
            title: format!("Investigate {trend} ({category})"),
            trend: trend.into(),
            trend_run_at: t0(),
            category: category.into(),
            tags: BTreeSet::from([trend.to_string(), category.to_string()]),
            locations: vec!["docs/investigations".into()],
            priority: Priority::High,
            status: MissionStatus::Open,
            abandoned_by: Vec::new(),
            created_at: t0(),
        })
        .expect("fresh key")
}

fn dispatcher(agents: &[(&str, &str)]) -> Dispatcher {
    let registry = AgentRegistry::default();
    for (name, spec) in agents {
        registry.register(name, spec).unwrap();
    }
    Dispatcher::new(
        Arc::new(MissionBoard::new()),
        Arc::new(registry),
        Arc::new(TagOverlapScorer::default()),
        AssignmentPolicy::default(),
    )
}

#[test]
fn concurrent_claims_never_double_assign() {
    let names: Vec<String> = (0..5).map(|i| format!("agent-{i}")).collect();
    let roster: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "ai")).collect();
    let d = Arc::new(dispatcher(&roster));
    let ids: Vec<MissionId> = (0..20)
        .map(|i| add_mission(d.board(), &format!("trend{i}"), "ai"))
        .collect();

    let mut workers = Vec::new();
    for w in 0..8 {
        let d = Arc::clone(&d);
        let mut order = ids.clone();
        order.rotate_left(w * 3 % ids.len());
        workers.push(thread::spawn(move || {
            let mut won = Vec::new();
            for id in order {
                if let Ok(a) = d.assign(id, t0()) {
                    won.push(a);
                }
            }
            won
        }));
    }
    let wins: Vec<_> = workers
        .into_iter()
        .flat_map(|h| h.join().expect("worker"))
        .collect();

    // 5 agents with one slot each
    assert_eq!(wins.len(), 5);
    let missions: BTreeSet<_> = wins.iter().map(|a| a.mission).collect();
    assert_eq!(missions.len(), wins.len(), "a mission was claimed twice");

    let mut per_agent: BTreeMap<String, usize> = BTreeMap::new();
    for m in d.board().list() {
        if let Some(agent) = m.assignee() {
            *per_agent.entry(agent.to_string()).or_default() += 1;
        }
    }
    assert_eq!(per_agent.len(), 5);
    assert!(per_agent.values().all(|n| *n == 1));
    for v in d.registry().list() {
        assert_eq!(v.active.len(), 1, "{}", v.profile.name);
    }
}

#[test]
fn timed_out_claim_moves_to_another_agent() {
    let d = dispatcher(&[("ada", "ai agents"), ("bob", "security")]);
    let id = add_mission(d.board(), "agents", "ai");

    let first = d.run_cycle(t0());
    assert_eq!(first.assigned.len(), 1);
    assert_eq!(first.assigned[0].agent, "ada");

    // Just short of the timeout nothing happens.
    let early = d.run_cycle(t0() + Duration::hours(6) - Duration::seconds(1));
    assert!(early.abandoned.is_empty());
    assert!(early.assigned.is_empty());

    let later = t0() + Duration::hours(6);
    let report = d.run_cycle(later);
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].agent, "ada");
    assert_eq!(report.abandoned[0].abandoned_at, later);
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].agent, "bob");

    let m = d.board().get(id).unwrap();
    assert_eq!(m.assignee(), Some("bob"));
    assert_eq!(m.abandoned_by, vec!["ada".to_string()]);
    assert!(d.registry().get("ada").unwrap().active.is_empty());
}

#[test]
fn abandoned_mission_with_no_other_agent_stays_claimable() {
    let d = dispatcher(&[("ada", "ai")]);
    let id = add_mission(d.board(), "agents", "ai");
    d.run_cycle(t0());

    let report = d.run_cycle(t0() + Duration::hours(7));
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.unassigned, vec![id]);
    let m = d.board().get(id).unwrap();
    assert_eq!(m.status.name(), "abandoned");
    assert!(m.is_claimable());
}

#[test]
fn low_performers_are_eliminated_but_keep_history() {
    let d = dispatcher(&[("ada", "ai"), ("bob", "security")]);

    for i in 0..3 {
        let id = add_mission(d.board(), &format!("round{i}"), "ai");
        let a = d.assign(id, t0()).unwrap();
        assert_eq!(a.agent, "ada");
        d.complete(
            id,
            Completion {
                agent: "ada".into(),
                artifacts: Vec::new(),
                quality_score: 10.0,
                success: true,
            },
            t0() + Duration::minutes(30),
        )
        .unwrap();
    }

    let ada = d.registry().get("ada").unwrap();
    assert!(ada.eliminated);
    assert!(ada.profile.performance_score < 40.0);
    assert_eq!(d.registry().history("ada").unwrap().len(), 3);

    let next = add_mission(d.board(), "round3", "ai");
    let mission = d.board().get(next).unwrap();
    assert!(d
        .rank_candidates(&mission)
        .iter()
        .all(|c| c.name != "ada"));
    assert_eq!(d.assign(next, t0()).unwrap().agent, "bob");
}

#[test]
fn completion_is_rejected_for_the_wrong_agent_and_bad_quality() {
    let d = dispatcher(&[("ada", "ai"), ("bob", "security")]);
    let id = add_mission(d.board(), "agents", "ai");
    d.assign(id, t0()).unwrap();

    let wrong = d.complete(
        id,
        Completion {
            agent: "bob".into(),
            artifacts: Vec::new(),
            quality_score: 90.0,
            success: true,
        },
        t0(),
    );
    assert!(matches!(
        wrong,
        Err(AssignError::Mission(MissionError::WrongAssignee { .. }))
    ));

    let bad = d.complete(
        id,
        Completion {
            agent: "ada".into(),
            artifacts: Vec::new(),
            quality_score: 140.0,
            success: true,
        },
        t0(),
    );
    assert!(matches!(
        bad,
        Err(AssignError::Mission(MissionError::QualityOutOfRange(_)))
    ));

    // Still assigned after both rejections.
    assert_eq!(d.board().get(id).unwrap().assignee(), Some("ada"));
    assert!(d.registry().history("ada").unwrap().is_empty());
}

#[test]
fn unknown_mission_is_reported() {
    let d = dispatcher(&[("ada", "ai")]);
    assert!(matches!(
        d.assign(MissionId(99), t0()),
        Err(AssignError::UnknownMission(MissionId(99)))
    ));
}
