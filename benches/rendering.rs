use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fleetwatch::app::{BackendEvent, UiApp};
use fleetwatch::models::{AgentSnapshot, AgentStatus, TasksDocument};
use fleetwatch::ui;
use ratatui::backend::TestBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use std::time::Instant;

// ── Helpers ─────────────────────────────────────────────────────────

fn generate_output(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        if i % 40 == 10 {
            out.push_str("```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n");
        }
        out.push_str(&format!(
            "\x1b[32mline {i}\x1b[0m: applied edit to src/module_{i}.rs\n"
        ));
    }
    out
}

fn make_document(n: usize, output_lines: usize) -> TasksDocument {
    let mut doc = TasksDocument::default();
    let output = generate_output(output_lines);
    for i in 0..n {
        let id = format!("agent-{i:02}");
        let mut snapshot = AgentSnapshot::new(id.clone());
        snapshot.status = match i % 4 {
            0 => AgentStatus::InProgress,
            1 => AgentStatus::Completed,
            2 => AgentStatus::Pending,
            _ => AgentStatus::Error,
        };
        snapshot.task = format!("Implement feature number {i} across the codebase");
        snapshot.progress = Some("Reading files".to_string());
        snapshot.thought = Some("The parser needs a new branch".to_string());
        snapshot.aider_output = output.clone();
        doc.agents.insert(id, snapshot);
    }
    doc.repository_url = Some("https://github.com/acme/widgets".to_string());
    doc
}

fn make_app(n: usize, output_lines: usize) -> UiApp {
    let (cmd_tx, _cmd_rx) = tokio::sync::mpsc::channel(1);
    let (_event_tx, event_rx) = tokio::sync::mpsc::channel(1);
    let mut app = UiApp::new(cmd_tx, event_rx, 3, None);
    app.sync.set_viewports(18, 8);
    app.apply_backend_event(
        BackendEvent::Snapshot(make_document(n, output_lines)),
        Instant::now(),
    );
    app
}

// ── Benchmarks ──────────────────────────────────────────────────────

fn bench_draw_full_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_full_frame");

    for n in [0, 3, 20] {
        group.bench_function(format!("{n}_agents"), |b| {
            let app = make_app(n, 50);
            let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();

            b.iter(|| {
                terminal
                    .draw(|frame| ui::draw(frame, black_box(&app)))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_draw_sidebar(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_sidebar");

    for n in [3, 20] {
        group.bench_function(format!("{n}_agents"), |b| {
            let app = make_app(n, 0);
            let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
            let area = Rect::new(0, 0, 30, 24);

            b.iter(|| {
                terminal
                    .draw(|frame| ui::sidebar::draw_sidebar(frame, black_box(&app), area))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_draw_preview(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_preview");

    for lines in [10, 1000] {
        group.bench_function(format!("{lines}_lines"), |b| {
            let mut app = make_app(1, lines);
            app.show_trace = true;
            let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
            let area = Rect::new(30, 0, 90, 40);

            b.iter(|| {
                terminal
                    .draw(|frame| ui::preview::draw_preview(frame, black_box(&app), area))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_output_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_text");

    for lines in [100, 5000] {
        group.bench_function(format!("{lines}_lines"), |b| {
            let output = generate_output(lines);
            b.iter(|| ui::preview::output_text(black_box(&output)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_draw_full_frame,
    bench_draw_sidebar,
    bench_draw_preview,
    bench_output_text,
);
criterion_main!(benches);
