//
// Reachability-based planning of a planar two-link arm around a box obstacle
//
// Plans in a receding-horizon loop, keeps the previous trajectory whenever
// no certified one is found, and plots the executed joint positions.
//

use std::f64::consts::PI;
use std::sync::Arc;

use gnuplot::{AxesCommon, Caption, Color, Figure};
use nalgebra::DVector;

use rtd_planner::common::{ArmInfo, JointLimit, RobotState, RtdPlanner, RtdResult, WorldState};
use rtd_planner::planner::{ArmourPlanner, ArmourPlannerConfig, ArmourPlannerOptions};
use rtd_planner::reachsets::PlanarArmOccupancy;
use rtd_planner::sets::Zonotope;
use rtd_planner::trajectory::{TrajectoryContainer, TrajectoryType, ZeroHoldArmTrajectory};
use rtd_planner::trajopt::TrajOptProps;

// Link lengths and radius
const L1: f64 = 1.0;
const L2: f64 = 1.0;
const LINK_RADIUS: f64 = 0.05;

const PLANNING_STEPS: usize = 8;
const PLOT_DT: f64 = 0.01;

fn run() -> RtdResult<()> {
    let props = TrajOptProps::default();
    let arm_info = ArmInfo::new(vec![JointLimit::symmetric(PI); 2], vec![JointLimit::symmetric(PI); 2])?;
    let options = ArmourPlannerOptions {
        trajectory_types: vec![TrajectoryType::Piecewise, TrajectoryType::Bernstein],
        ..ArmourPlannerOptions::default()
    };
    let config = ArmourPlannerConfig::new(props, arm_info, options);
    println!("Planner config:\n{}", config.to_json()?);

    let mut planner = ArmourPlanner::builder(config)
        .occupancy(Arc::new(PlanarArmOccupancy::new(vec![L1, L2], LINK_RADIUS)?))
        .build()?;

    let obstacle = Zonotope::from_box(DVector::from_vec(vec![1.0, 1.2]), &DVector::from_vec(vec![0.15, 0.15]))?;
    let world = WorldState::from_obstacles(vec![obstacle]);
    let goal = DVector::from_vec(vec![PI / 3.0, 0.2]);

    let start = RobotState::at_rest(0.0, DVector::zeros(2))?;
    let mut executed = TrajectoryContainer::new(Box::new(ZeroHoldArmTrajectory::new(props, start.clone())))?;

    let mut state = start;
    for step in 0..PLANNING_STEPS {
        let (trajectory, info) = planner.plan_trajectory(&state, &world, &goal)?;
        match trajectory {
            Some(trajectory) => {
                println!(
                    "step {}: problem {:?} wins with cost {:.4} ({} of {} feasible)",
                    step,
                    info.solution_id,
                    info.cost.unwrap_or(f64::NAN),
                    info.num_feasible(),
                    info.problems.len()
                );
                executed.set_trajectory(trajectory, false)?;
            }
            None => {
                println!("step {}: no certified trajectory, continuing the previous one", step);
                println!("{}", info.to_json()?);
            }
        }
        state = executed.get_command(state.time() + props.plan_time())?;
    }

    let n = (state.time() / PLOT_DT).round() as usize;
    let times: Vec<f64> = (0..=n).map(|i| i as f64 * PLOT_DT).collect();
    let commands = executed.get_commands(&times)?;
    let q1: Vec<f64> = commands.iter().map(|c| c.position()[0]).collect();
    let q2: Vec<f64> = commands.iter().map(|c| c.position()[1]).collect();
    println!("final position: [{:.4}, {:.4}], goal: [{:.4}, {:.4}]", q1[n], q2[n], goal[0], goal[1]);

    let mut fg = Figure::new();
    {
        let axes = fg
            .axes2d()
            .set_title("ARMOUR - Joint Positions vs Time", &[])
            .set_x_label("Time [s]", &[])
            .set_y_label("Angle [rad]", &[]);
        axes.lines(&times, &q1, &[Caption("q1 [rad]"), Color("blue")]);
        axes.lines(&times, &q2, &[Caption("q2 [rad]"), Color("red")]);
        axes.lines(&[0.0, state.time()], &[goal[0], goal[0]], &[Caption("q1 goal"), Color("cyan")]);
        axes.lines(&[0.0, state.time()], &[goal[1], goal[1]], &[Caption("q2 goal"), Color("magenta")]);
    }

    if let Err(e) = std::fs::create_dir_all("./img") {
        eprintln!("Could not create ./img: {}", e);
        return Ok(());
    }
    match fg.save_to_svg("./img/armour_demo.svg", 640, 480) {
        Ok(_) => println!("Plot saved to ./img/armour_demo.svg"),
        Err(e) => eprintln!("Failed to save plot: {}", e),
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("armour_demo failed: {}", e);
        std::process::exit(1);
    }
}
