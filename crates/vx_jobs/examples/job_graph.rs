//! Walks the classic dependency shapes: independent tasks, a chain,
//! fork-join, nested submission, and a parallel reduction.
//!
//! Run with `RUST_LOG=debug` to watch the pool come up and drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use vx_jobs::{NamedThread, Scheduler, SchedulerError, Task, submit, submit_after};

fn independent_tasks() -> Result<(), SchedulerError> {
    println!("\n=== Independent tasks ===");

    let events = ["A", "B", "C"].map(|name| {
        submit(move || {
            println!("task {name} executing");
            thread::sleep(Duration::from_millis(50));
            println!("task {name} complete");
        })
    });

    for event in events {
        event?.wait();
    }
    println!("all independent tasks completed");
    Ok(())
}

fn task_chain() -> Result<(), SchedulerError> {
    println!("\n=== Task chain ===");

    let loaded = submit(|| {
        println!("loading resources...");
        thread::sleep(Duration::from_millis(50));
    })?;
    let processed = submit_after(
        || {
            println!("processing data...");
            thread::sleep(Duration::from_millis(50));
        },
        &loaded,
    )?;
    let finalized = submit_after(|| println!("finalizing"), &processed)?;

    finalized.wait();
    println!("task chain completed");
    Ok(())
}

fn fork_join() -> Result<(), SchedulerError> {
    println!("\n=== Fork-join ===");

    let branches: Vec<_> = [100u64, 150, 80]
        .iter()
        .enumerate()
        .map(|(i, &ms)| {
            submit(move || {
                println!("parallel task {i} started");
                thread::sleep(Duration::from_millis(ms));
                println!("parallel task {i} finished");
            })
        })
        .collect::<Result<_, _>>()?;

    let join = Task::create_and_dispatch(
        || println!("join task: all branches completed"),
        &branches,
        NamedThread::Any,
    )?;

    join.wait();
    println!("fork-join completed");
    Ok(())
}

fn nested_tasks() -> Result<(), SchedulerError> {
    println!("\n=== Nested submission ===");

    let parent = submit(|| {
        println!("parent task started");

        let child_a = submit(|| {
            println!("  child A executing");
            thread::sleep(Duration::from_millis(50));
        })
        .expect("pool is running");
        let child_b = submit(|| {
            println!("  child B executing");
            thread::sleep(Duration::from_millis(50));
        })
        .expect("pool is running");

        child_a.wait();
        child_b.wait();
        println!("parent task completed (after children)");
    })?;

    parent.wait();
    println!("nested tasks completed");
    Ok(())
}

fn parallel_reduction() -> Result<(), SchedulerError> {
    const CHUNKS: usize = 8;

    println!("\n=== Parallel reduction ===");

    let partials: Arc<Vec<AtomicU32>> = Arc::new((0..CHUNKS).map(|_| AtomicU32::new(0)).collect());

    let leaves: Vec<_> = (0..CHUNKS)
        .map(|chunk| {
            let partials = Arc::clone(&partials);
            submit(move || {
                let base = (chunk * 1000) as u32;
                let sum = (base..base + 1000).sum();
                partials[chunk].store(sum, Ordering::SeqCst);
            })
        })
        .collect::<Result<_, _>>()?;

    let partials2 = Arc::clone(&partials);
    let reduce = Task::create_and_dispatch(
        move || {
            let total: u64 = partials2
                .iter()
                .map(|slot| u64::from(slot.load(Ordering::SeqCst)))
                .sum();
            println!("total: {total}");
            assert_eq!(total, (0..(CHUNKS as u64) * 1000).sum::<u64>());
        },
        &leaves,
        NamedThread::Any,
    )?;

    reduce.wait();
    println!("parallel reduction completed");
    Ok(())
}

fn main() -> Result<(), SchedulerError> {
    env_logger::init();

    Scheduler::initialize(-1)?;

    independent_tasks()?;
    task_chain()?;
    fork_join()?;
    if Scheduler::worker_count() >= 2 {
        nested_tasks()?;
    } else {
        // A parent that waits on its children needs a second worker to run
        // them.
        println!("\nskipping nested submission demo on a single-worker pool");
    }
    parallel_reduction()?;

    Scheduler::shutdown();
    Ok(())
}
