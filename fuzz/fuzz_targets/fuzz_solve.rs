#![no_main]

use libfuzzer_sys::fuzz_target;
use passflow_core::{solve, validate_schedule, Constraint, PassId};

// First byte picks the pass count, every following byte pair is a
// "first before second" constraint between two passes.
// Goal: no panics, and an acyclic result always satisfies every constraint.
fuzz_target!(|data: &[u8]| {
    let Some((&count, pairs)) = data.split_first() else {
        return;
    };
    let n = usize::from(count % 16) + 1;
    let ids: Vec<PassId> = (0..n).map(|i| PassId::allocate(&format!("p{i}"))).collect();

    let constraints: Vec<Constraint> = pairs
        .chunks_exact(2)
        .map(|pair| {
            let first = ids[usize::from(pair[0]) % n].clone();
            let second = ids[usize::from(pair[1]) % n].clone();
            Constraint::from_fn("fuzz", move |a, b| !(*a == second && *b == first))
        })
        .collect();

    let solution = solve(&ids, &constraints);
    assert_eq!(solution.schedule.len(), n);
    if !solution.cyclic {
        for constraint in &constraints {
            assert!(validate_schedule(constraint, &solution.schedule).is_ok());
        }
    }
});
