use super::*;

fn pkg(pid: u16, body: &[u8]) -> Package {
    Package::new(pid, 7, body.to_vec())
}

#[test]
fn append_then_peek_and_commit_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut fifo = Fifo::open(dir.path(), 1_000_000, 10_000_000).unwrap();

    assert_eq!(fifo.append(&pkg(1, b"hello")).unwrap(), AppendOutcome::Ok);
    assert_eq!(fifo.append(&pkg(2, b"world")).unwrap(), AppendOutcome::Ok);

    let first = fifo.peek().unwrap().unwrap();
    assert_eq!(first.pid, 1);
    // Peeking again without committing returns the same record.
    let first_again = fifo.peek().unwrap().unwrap();
    assert_eq!(first_again.pid, 1);
    fifo.commit().unwrap();

    let second = fifo.peek().unwrap().unwrap();
    assert_eq!(second.pid, 2);
    fifo.commit().unwrap();

    assert!(fifo.peek().unwrap().is_none());
}

#[test]
fn peek_on_empty_fifo_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let mut fifo = Fifo::open(dir.path(), 1_000_000, 10_000_000).unwrap();
    assert!(fifo.peek().unwrap().is_none());
}

#[test]
fn hard_cap_rejects_further_appends() {
    let dir = tempfile::tempdir().unwrap();
    let mut fifo = Fifo::open(dir.path(), 1_000_000, 40).unwrap();
    assert_eq!(fifo.append(&pkg(1, b"0123456789")).unwrap(), AppendOutcome::Ok);
    let outcome = fifo.append(&pkg(2, b"0123456789012345678901234567890")).unwrap();
    assert_eq!(outcome, AppendOutcome::NoFreeSpace);
}

#[test]
fn segment_rolls_past_size_cap() {
    let dir = tempfile::tempdir().unwrap();
    let mut fifo = Fifo::open(dir.path(), 20, 10_000_000).unwrap();
    fifo.append(&pkg(1, b"0123456789")).unwrap();
    fifo.append(&pkg(2, b"0123456789")).unwrap();
    assert_eq!(fifo.segment_count(), 2);
}

#[test]
fn fully_delivered_rolled_segment_is_unlinked() {
    let dir = tempfile::tempdir().unwrap();
    let mut fifo = Fifo::open(dir.path(), 20, 10_000_000).unwrap();
    fifo.append(&pkg(1, b"0123456789")).unwrap();
    fifo.append(&pkg(2, b"0123456789")).unwrap();
    assert_eq!(fifo.segment_count(), 2);

    fifo.peek().unwrap();
    fifo.commit().unwrap();
    assert_eq!(fifo.segment_count(), 1);
}

#[test]
fn cursor_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut fifo = Fifo::open(dir.path(), 1_000_000, 10_000_000).unwrap();
        fifo.append(&pkg(1, b"a")).unwrap();
        fifo.append(&pkg(2, b"b")).unwrap();
        fifo.peek().unwrap();
        fifo.commit().unwrap();
    }

    let mut fifo = Fifo::open(dir.path(), 1_000_000, 10_000_000).unwrap();
    let pkg = fifo.peek().unwrap().unwrap();
    assert_eq!(pkg.pid, 2);
}

#[test]
fn partial_tail_is_truncated_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let fifo = Fifo::open(dir.path(), 1_000_000, 10_000_000).unwrap();
        drop(fifo);
    }
    let segment_path = dir.path().join("0");
    let mut bytes = pkg(1, b"complete").to_vec().unwrap();
    bytes.extend_from_slice(&[1, 2, 3]); // truncated trailing frame
    std::fs::write(&segment_path, &bytes).unwrap();

    let mut fifo = Fifo::open(dir.path(), 1_000_000, 10_000_000).unwrap();
    let only = fifo.peek().unwrap().unwrap();
    assert_eq!(only.pid, 1);
    fifo.commit().unwrap();
    assert!(fifo.peek().unwrap().is_none());
}
