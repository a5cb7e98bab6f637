//! Queue construction and iteration invariants.

use imagery_daq::session::SessionQueue;
use imagery_daq::stimulus::{ShapeKind, Stimulus};

fn subjects(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn stimuli() -> Vec<Stimulus> {
    vec![
        Stimulus::Shape(ShapeKind::Circle),
        Stimulus::Shape(ShapeKind::Square),
    ]
}

#[test]
fn size_is_subjects_times_repetitions() {
    let queue = SessionQueue::build(&subjects(&["a", "b", "c"]), 4, &stimuli(), 1).unwrap();
    assert_eq!(queue.len(), 12);
}

#[test]
fn subjects_are_interleaved_within_each_repetition() {
    let names = subjects(&["alice", "bob"]);
    let queue = SessionQueue::build(&names, 3, &stimuli(), 1).unwrap();
    for (k, item) in queue.items().iter().enumerate() {
        assert_eq!(item.repetition, (k / names.len()) as u32 + 1, "item {k}");
        assert_eq!(item.subject, names[k % names.len()], "item {k}");
    }
}

#[test]
fn advance_walks_to_done_marking_items_completed() {
    let mut queue = SessionQueue::build(&subjects(&["a", "b"]), 2, &stimuli(), 1).unwrap();
    assert!(!queue.is_done());
    let mut steps = 0;
    while !queue.is_done() {
        queue.advance();
        steps += 1;
    }
    assert_eq!(steps, queue.len());
    assert!(queue.current().is_none());
    assert!(queue.items().iter().all(|item| item.completed));
}

#[test]
fn reset_current_clears_completed_without_moving() {
    let mut queue = SessionQueue::build(&subjects(&["a"]), 2, &stimuli(), 1).unwrap();
    queue.advance();
    assert_eq!(queue.current_index(), 1);
    queue.reset_current();
    assert_eq!(queue.current_index(), 1);
    assert!(!queue.items()[1].completed);
    // The already-finished item is untouched.
    assert!(queue.items()[0].completed);
}

#[test]
fn snapshot_mirrors_cursor_and_completion() {
    let mut queue = SessionQueue::build(&subjects(&["a", "b"]), 1, &stimuli(), 1).unwrap();
    queue.advance();
    let snapshot = queue.progress_snapshot();
    assert_eq!(snapshot.cursor_index, 1);
    assert_eq!(snapshot.items.len(), 2);
    assert!(snapshot.items[0].completed);
    assert!(!snapshot.items[1].completed);
    assert_eq!(snapshot.items[1].subject, "b");
}
