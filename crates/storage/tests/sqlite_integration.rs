use exam_core::model::{
    Answer, AnswerKey, AnswerValue, ChoiceOption, FinalizeReason, OptionId, QuestionId,
    QuestionKind, SessionMode, Tally, TargetRef, UserId,
};
use exam_core::time::fixed_now;
use storage::repository::{
    AttemptRecord, CompletionRequest, QuestionRequest, QuestionSource, ScoringService,
    StorageError,
};
use storage::sqlite::{ExamRecord, ExamSectionRecord, QuestionRecord, SqliteRepository};

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn mcq(correct: u64) -> (QuestionKind, AnswerKey) {
    let kind = QuestionKind::McqSingle {
        options: vec![
            ChoiceOption::new(OptionId::new(1), "one"),
            ChoiceOption::new(OptionId::new(2), "two"),
        ],
    };
    (kind, AnswerKey::McqSingle { option: OptionId::new(correct) })
}

fn record(id: u64, kind: QuestionKind, key: Option<AnswerKey>) -> QuestionRecord {
    QuestionRecord {
        id,
        subtopic_id: None,
        section_id: None,
        position: 0,
        kind,
        prompt: format!("Question {id}"),
        media: None,
        marks: 1,
        key,
        explanation: Some("because".into()),
    }
}

async fn seed_exam(repo: &SqliteRepository) {
    repo.upsert_exam(&ExamRecord {
        id: 7,
        title: "Midterm".into(),
        overall_time_limit_seconds: Some(600),
        allow_continue_after_time_up: true,
    })
    .await
    .unwrap();
    for (id, ordinal) in [(20_u64, 2_u32), (10, 1)] {
        repo.upsert_section(&ExamSectionRecord {
            id,
            exam_id: 7,
            name: format!("Part {ordinal}"),
            ordinal,
            time_limit_seconds: Some(120),
        })
        .await
        .unwrap();
    }
    for (qid, section, position) in [(1_u64, 10_u64, 1_u32), (2, 10, 0), (3, 20, 0)] {
        let (kind, key) = mcq(2);
        let mut q = record(qid, kind, Some(key));
        q.section_id = Some(section);
        q.position = position;
        repo.upsert_question(&q).await.unwrap();
    }
}

fn exam_request(user: UserId) -> QuestionRequest {
    QuestionRequest {
        target: TargetRef::Exam(7),
        scope_id: None,
        subject_context: None,
        user_id: user,
        limit: None,
    }
}

#[tokio::test]
async fn exam_delivery_is_ordered_and_keyless() {
    let repo = connect("memdb_exam_delivery").await;
    seed_exam(&repo).await;

    let set = repo
        .generate_session_questions(&exam_request(UserId::new(1)))
        .await
        .unwrap();

    assert_eq!(set.overall_time_limit_seconds, Some(600));
    assert!(set.allow_continue_after_time_up);
    assert_eq!(set.sections.len(), 2);
    assert_eq!(set.sections[0].name, "Part 1");
    assert_eq!(set.sections[0].time_limit_seconds, Some(120));
    let first_ids: Vec<_> = set.sections[0].questions.iter().map(|q| q.id()).collect();
    assert_eq!(first_ids, vec![QuestionId::new(2), QuestionId::new(1)]);
    assert!(set.sections.iter().flat_map(|s| &s.questions).all(|q| !q.has_key()));
}

#[tokio::test]
async fn unknown_exam_is_not_found() {
    let repo = connect("memdb_unknown_exam").await;
    let mut request = exam_request(UserId::new(1));
    request.target = TargetRef::Exam(404);
    let err = repo.generate_session_questions(&request).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn practice_sampling_respects_limit_and_keeps_keys() {
    let repo = connect("memdb_practice_sample").await;
    for qid in 1..=6 {
        let mut q = record(qid, QuestionKind::TrueFalse, Some(AnswerKey::TrueFalse { value: true }));
        q.subtopic_id = Some(3);
        repo.upsert_question(&q).await.unwrap();
    }

    let set = repo
        .generate_session_questions(&QuestionRequest {
            target: TargetRef::Subtopic(3),
            scope_id: None,
            subject_context: None,
            user_id: UserId::new(1),
            limit: Some(4),
        })
        .await
        .unwrap();

    assert_eq!(set.sections.len(), 1);
    assert_eq!(set.question_count(), 4);
    assert!(set.overall_time_limit_seconds.is_none());
    assert!(set.sections[0].questions.iter().all(|q| q.has_key()));
}

#[tokio::test]
async fn completion_is_graded_server_side_once() {
    let repo = connect("memdb_completion").await;
    seed_exam(&repo).await;
    let user = UserId::new(5);
    let session = repo
        .create_session(user, TargetRef::Exam(7), None)
        .await
        .unwrap();

    let answers = vec![
        Answer::new(QuestionId::new(1), AnswerValue::McqSingle(OptionId::new(2)), fixed_now()),
        Answer::new(QuestionId::new(2), AnswerValue::McqSingle(OptionId::new(1)), fixed_now()),
    ];
    let request = CompletionRequest {
        session_id: session,
        user_id: user,
        mode: SessionMode::Exam,
        tally: Tally::from_counts(3, 0, 0, 1, 2).unwrap(),
        elapsed_seconds: 90,
        late: false,
        reason: FinalizeReason::Manual,
        answers,
    };

    let first = repo.complete_session(&request).await.unwrap();
    let tally = first.tally.unwrap();
    assert_eq!(tally.correct(), 1);
    assert_eq!(tally.wrong(), 1);
    assert_eq!(tally.skipped(), 1);
    assert_eq!(tally.pending(), 0);
    assert_eq!(first.score, Some(1));

    let again = repo.complete_session(&request).await.unwrap();
    assert_eq!(again, first);
}

#[tokio::test]
async fn attempts_are_logged_per_session() {
    let repo = connect("memdb_attempts").await;
    let user = UserId::new(2);
    let session = repo
        .create_session(user, TargetRef::Subtopic(3), Some(11))
        .await
        .unwrap();

    repo.record_attempt(&AttemptRecord {
        session_id: session,
        question_id: QuestionId::new(1),
        user_id: user,
        value: AnswerValue::TrueFalse(true),
        correct: Some(true),
        time_spent_seconds: 12,
        recorded_at: fixed_now(),
    })
    .await
    .unwrap();

    assert_eq!(repo.attempt_count(session).await.unwrap(), 1);
}
