use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use spotlight_tour::config::RuntimeConfig;
use spotlight_tour::geometry::{Rect, Size};
use spotlight_tour::headless::{HeadlessElement, HeadlessPage, WatcherEvent};
use spotlight_tour::host::HostEvent;
use spotlight_tour::persistence::{JsonFileStore, TourPreferences};
use spotlight_tour::positioning::Placement;
use spotlight_tour::tour::{
    NextOutcome, RecordingSink, StartOptions, StepDefinition, StopReason, TourCatalogue,
    TourDefinition, TourEvent, TourRuntimeState,
};
use spotlight_tour::{TourError, TourService};

const SETTLE: Duration = Duration::from_millis(300);

fn page() -> Rc<HeadlessPage> {
    let page = Rc::new(HeadlessPage::new(Size::new(1280.0, 800.0)));
    for (i, locator) in ["#nav", "#search", "#filters", "#table", "#export"].iter().enumerate() {
        let x = 40.0 + i as f64 * 220.0;
        page.insert(HeadlessElement::new(*locator, Rect::new(x, 120.0, 160.0, 48.0)));
    }
    page.insert(
        HeadlessElement::new("#report-chart", Rect::new(300.0, 300.0, 400.0, 200.0)).on_route("/reports"),
    );
    page
}

fn catalogue(entered: Rc<RefCell<Vec<String>>>) -> Rc<TourCatalogue> {
    let mut catalogue = TourCatalogue::new();
    let steps = ["#nav", "#search", "#filters", "#table", "#export"]
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let log = entered.clone();
            StepDefinition::new(format!("step-{}", i), *target).with_on_enter(Rc::new(
                move |ctx: &spotlight_tour::tour::StepContext<'_>| -> anyhow::Result<()> {
                    log.borrow_mut().push(ctx.step_id.to_string());
                    Ok(())
                },
            ))
        })
        .collect();
    catalogue
        .register(TourDefinition::new("onboarding", steps).with_title("Onboarding"))
        .unwrap();
    catalogue
        .register(TourDefinition::new("reports", vec![
            StepDefinition::new("chart", "#report-chart")
                .with_route("/reports")
                .with_position(Placement::Top),
            StepDefinition::new("export", "#export"),
        ]))
        .unwrap();
    Rc::new(catalogue)
}

struct Session {
    page: Rc<HeadlessPage>,
    service: TourService,
    sink: Rc<RecordingSink>,
    entered: Rc<RefCell<Vec<String>>>,
    preferences: TourPreferences,
}

fn session() -> Session {
    session_with(TourPreferences::in_memory())
}

fn session_with(preferences: TourPreferences) -> Session {
    let page = page();
    let entered = Rc::new(RefCell::new(Vec::new()));
    let mut service = TourService::new(
        catalogue(entered.clone()),
        HeadlessPage::ports(&page),
        preferences.clone(),
        RuntimeConfig::default(),
    );
    let sink = Rc::new(RecordingSink::new());
    service.subscribe(sink.clone());
    Session {
        page,
        service,
        sink,
        entered,
        preferences,
    }
}

fn assert_idle(service: &TourService) {
    assert_eq!(service.state(), &TourRuntimeState::default());
    assert!(!service.overlay().visible);
    assert_eq!(service.progress(), 0.0);
}

#[test]
fn test_skip_scenario_keeps_completion_list() {
    let mut s = session();
    s.service.start_tour("onboarding", StartOptions::default()).unwrap();
    s.service.next_step().unwrap();
    s.service.next_step().unwrap();

    assert_eq!(s.service.state().step_history, vec![0, 1]);
    assert!(s.service.previous_step());
    assert_eq!(s.service.state().current_step_index, 1);

    let summary = s.service.stop_tour(StopReason::Skipped).unwrap();
    assert_eq!(summary.reason, StopReason::Skipped);
    assert!((summary.completion_rate - 0.4).abs() < 1e-9);
    assert!(s.preferences.completed_tours().is_empty());
    assert_idle(&s.service);
    assert_eq!(
        s.entered.borrow().as_slice(),
        &["step-0", "step-1", "step-2", "step-1"]
    );
}

#[test]
fn test_n_next_calls_complete_n_step_tour() {
    let mut s = session();
    s.service.start_tour("onboarding", StartOptions::default()).unwrap();
    let mut outcome = None;
    for _ in 0..5 {
        outcome = Some(s.service.next_step().unwrap());
    }
    assert!(matches!(outcome, Some(NextOutcome::Completed(_))));
    assert_idle(&s.service);
    assert_eq!(s.preferences.completed_tours(), vec!["onboarding"]);
    assert!(matches!(s.service.next_step(), Err(TourError::NotActive)));
}

#[test]
fn test_stop_restores_idle_from_every_state() {
    let mut s = session();
    // Idle
    assert!(s.service.stop_tour(StopReason::Closed).is_none());
    assert_idle(&s.service);

    // Loading (settle pending)
    s.service.start_tour("onboarding", StartOptions::default()).unwrap();
    assert!(s.service.state().is_loading);
    s.service.stop_tour(StopReason::Closed).unwrap();
    assert_idle(&s.service);

    // Revealed mid-tour
    s.service.start_tour("onboarding", StartOptions::at_step(2)).unwrap();
    s.service.tick(SETTLE);
    s.service.stop_tour(StopReason::Closed).unwrap();
    assert_idle(&s.service);

    // Paused
    s.service.start_tour("onboarding", StartOptions::default()).unwrap();
    s.service.tick(SETTLE * 3);
    s.service.pause_tour();
    s.service.stop_tour(StopReason::Skipped).unwrap();
    assert_idle(&s.service);
    let stats = s.service.tracker_stats();
    assert_eq!(stats.watcher_attachments, 2);
    assert_eq!(stats.watcher_teardowns, stats.watcher_attachments);
    assert!(!s.page.mutation_observer_connected());
}

#[test]
fn test_second_tour_tears_down_watchers_exactly_once() {
    let mut s = session();
    s.service.start_tour("onboarding", StartOptions::default()).unwrap();
    s.service.tick(SETTLE);
    s.service.next_step().unwrap();
    s.service.tick(SETTLE * 2);
    assert_eq!(s.service.tracker_stats().watcher_attachments, 1);
    let mark = s.page.watcher_log().len();

    s.service.start_tour("reports", StartOptions::default()).unwrap();
    s.service.tick(SETTLE * 3);

    let log: Vec<WatcherEvent> = s.page.watcher_log().split_off(mark);
    let disconnects = log
        .iter()
        .filter(|event| **event == WatcherEvent::MutationsDisconnected)
        .count();
    let first_attach = log
        .iter()
        .position(|event| *event == WatcherEvent::MutationsObserved)
        .unwrap();
    let first_detach = log
        .iter()
        .position(|event| *event == WatcherEvent::MutationsDisconnected)
        .unwrap();
    assert_eq!(disconnects, 1);
    assert!(first_detach < first_attach);
    assert_eq!(s.service.tracker_stats().watcher_teardowns, 1);
    assert_eq!(s.service.tracker_stats().watcher_attachments, 2);

    let records = s.sink.records();
    let reasons: Vec<StopReason> = records
        .iter()
        .filter_map(|record| match &record.event {
            TourEvent::TourStopped { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![StopReason::Superseded]);
}

#[test]
fn test_route_step_waits_for_prepared_view() {
    let mut s = session();
    s.service.start_tour("reports", StartOptions::default()).unwrap();
    assert_eq!(s.page.current_route().as_deref(), Some("/reports"));
    let prepared = s.page.prepared();
    let request = &prepared[0];
    assert_eq!(request.route.as_deref(), Some("/reports"));
    assert_eq!(request.target, "#report-chart");

    s.service.tick(SETTLE);
    let overlay = s.service.overlay();
    assert_eq!(overlay.spotlight, Some(Rect::new(292.0, 292.0, 416.0, 216.0)));
    assert_eq!(overlay.tooltip.unwrap().placement, Placement::Top);
}

#[test]
fn test_event_volume_does_not_multiply_passes() {
    let mut s = session();
    s.service.start_tour("onboarding", StartOptions::default()).unwrap();
    s.service.tick(SETTLE);
    let before = s.service.tracker_stats().passes;

    let element = s.page.resolve_id("#nav").unwrap();
    for _ in 0..50 {
        s.service.handle_host_event(HostEvent::Resized { element });
        s.service.handle_host_event(HostEvent::Mutated);
    }
    s.service.on_animation_frame(Duration::from_millis(320));
    s.service.on_animation_frame(Duration::from_millis(336));

    assert_eq!(s.service.tracker_stats().passes, before + 1);
}

#[test]
fn test_viewport_resize_repositions_tooltip() {
    let mut s = session();
    s.service.start_tour("onboarding", StartOptions::at_step(4)).unwrap();
    s.service.tick(SETTLE);
    assert!(!s.service.overlay().tooltip.unwrap().floating);

    // Too small for any candidate around the target
    let small = Size::new(420.0, 260.0);
    s.page.set_viewport(small);
    s.service.handle_host_event(HostEvent::ViewportResized { size: small });
    s.service.on_animation_frame(Duration::from_millis(320));

    let tooltip = s.service.overlay().tooltip.unwrap();
    assert!(tooltip.floating);
    let bounds = Rect::new(0.0, 0.0, small.width, small.height);
    assert!(bounds.contains_rect(&tooltip.rect()));
}

#[test]
fn test_completion_persisted_to_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.json");
    let store = Rc::new(JsonFileStore::open(&path).unwrap());
    let mut s = session_with(TourPreferences::new(store));

    s.service.start_tour("reports", StartOptions::at_step(1)).unwrap();
    s.service.tick(SETTLE);
    s.service.tick(SETTLE + Duration::from_secs(2));
    assert!(!s.service.state().is_active);

    let reopened = TourPreferences::new(Rc::new(JsonFileStore::open(&path).unwrap()));
    assert_eq!(reopened.completed_tours(), vec!["reports"]);
}
