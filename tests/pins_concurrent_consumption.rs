mod test_support;

use serde_json::{json, Value};
use std::sync::{Arc, Barrier};
use std::thread;
use test_support::{approved_result, i64_field, seed_school, str_field, temp_dir, Sidecar, SESSION, TERM};

const ROUNDS: usize = 10;

fn check_all(mut sc: Sidecar, codes: Vec<String>, admission: String, barrier: Arc<Barrier>) -> Vec<Value> {
    codes
        .iter()
        .map(|code| {
            barrier.wait();
            sc.call(
                "pins.checkResult",
                json!({ "code": code, "admissionNumber": admission, "session": SESSION, "term": TERM }),
            )
        })
        .collect()
}

#[test]
fn two_processes_racing_on_a_single_use_pin_consume_it_once() {
    let workspace = temp_dir("resultsd-pin-race");
    let mut setup = Sidecar::with_workspace(&workspace);
    let seed = seed_school(&mut setup, "school-a", true, &[], 1);
    approved_result(&mut setup, &seed, 0, 60.0);

    let issued = setup.ok(
        "pins.issue",
        json!({
            "actor": seed.admin(),
            "schoolId": seed.school_id,
            "session": SESSION,
            "term": TERM,
            "quantity": ROUNDS,
            "maxUsageCount": 1,
        }),
    );
    let codes: Vec<String> = issued["pins"]
        .as_array()
        .expect("pins")
        .iter()
        .map(|p| str_field(p, "code"))
        .collect();
    assert_eq!(codes.len(), ROUNDS);

    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let sc = Sidecar::with_workspace(&workspace);
            let codes = codes.clone();
            let admission = seed.admission(0).to_string();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || check_all(sc, codes, admission, barrier))
        })
        .collect();
    let outcomes: Vec<Vec<Value>> = workers
        .into_iter()
        .map(|w| w.join().expect("worker thread"))
        .collect();

    for round in 0..ROUNDS {
        let a = &outcomes[0][round];
        let b = &outcomes[1][round];
        let wins = [a, b].iter().filter(|r| r["ok"] == json!(true)).count();
        assert_eq!(wins, 1, "round {round}: {a} / {b}");
        let loser = if a["ok"] == json!(true) { b } else { a };
        assert_eq!(loser["error"]["code"], json!("usage_exhausted"), "round {round}");
    }

    let listed = setup.ok(
        "pins.list",
        json!({ "actor": seed.admin(), "schoolId": seed.school_id }),
    );
    for pin in listed["pins"].as_array().expect("pins") {
        assert_eq!(i64_field(pin, "usageCount"), 1);
        assert_eq!(i64_field(pin, "attemptCount"), 1);
        let attempts = setup.ok(
            "pins.attempts",
            json!({ "actor": seed.admin(), "pinId": str_field(pin, "id") }),
        );
        assert_eq!(attempts["attempts"].as_array().map(|a| a.len()), Some(1));
    }
}
