//! # Axis Step Engine Benchmark

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mount_lib::{
    axis::{AxisId, AxisIsr, AxisParams, AxisShared},
    mount_ctrl::{GotoTarget, MountCtrl, MountCtrlParams, MountInit},
    sim::{SimPins, SimTimer, Simulator},
    store::MemStore,
};
use util::module::State;

fn axis_tick_benchmark(c: &mut Criterion) {
    // An idle axis still services its timer on every interrupt
    let shared = Arc::new(AxisShared::new(AxisId::Axis1, 0, 1_000, 500, 20));
    let mut isr = AxisIsr::new(shared, SimTimer::default(), SimPins::default(), false);

    c.bench_function("axis_tick_idle", |b| {
        b.iter(|| {
            isr.tick();
            black_box(isr.timer_mut().take())
        })
    });
}

fn simulated_tracking_benchmark(c: &mut Criterion) {
    let params = MountCtrlParams {
        axis1: AxisParams {
            steps_per_degree: 10_000.0,
            ..MountCtrlParams::default().axis1
        },
        axis2: AxisParams {
            steps_per_degree: 10_000.0,
            ..MountCtrlParams::default().axis2
        },
        ..MountCtrlParams::default()
    };

    let ctrl = MountCtrl::init(MountInit {
        params,
        store: Box::new(MemStore::new()),
    })
    .unwrap();
    let mut sim = Simulator::new(ctrl);
    sim.ctrl_mut()
        .goto(GotoTarget::Equatorial {
            ha_deg: -30.0,
            dec_deg: 20.0,
            pier_side: None,
        })
        .unwrap();
    sim.run_until(|c| !c.mode().is_move_to(), 600.0).unwrap();
    sim.ctrl_mut().start_tracking().unwrap();

    // One simulated second of sidereal tracking, including every interrupt and main loop pass
    c.bench_function("track_one_second", |b| {
        b.iter(|| sim.run_for(black_box(1.0)).unwrap())
    });
}

criterion_group!(benches, axis_tick_benchmark, simulated_tracking_benchmark);
criterion_main!(benches);
