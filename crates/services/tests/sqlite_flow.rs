use exam_core::model::{
    AnswerKey, ChoiceOption, FinalizeReason, OptionId, QuestionId, QuestionKind, SectionAdvance,
    SectionId, UserId,
};
use exam_core::time::fixed_now;
use services::{AppServices, Clock, EngineSettings, SessionConfig, SessionStatus};
use storage::repository::Storage;
use storage::sqlite::{ExamRecord, ExamSectionRecord, QuestionRecord, SqliteRepository};

async fn seeded(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");

    repo.upsert_exam(&ExamRecord {
        id: 1,
        title: "Final".into(),
        overall_time_limit_seconds: Some(300),
        allow_continue_after_time_up: false,
    })
    .await
    .unwrap();
    for ordinal in 1..=2_u32 {
        repo.upsert_section(&ExamSectionRecord {
            id: u64::from(ordinal),
            exam_id: 1,
            name: format!("Section {ordinal}"),
            ordinal,
            time_limit_seconds: Some(120),
        })
        .await
        .unwrap();
    }

    let kind = QuestionKind::McqSingle {
        options: vec![
            ChoiceOption::new(OptionId::new(1), "yes"),
            ChoiceOption::new(OptionId::new(2), "no"),
        ],
    };
    let questions = [
        (1_u64, Some(1_u64), None),
        (2, Some(2), None),
        (3, None, Some(9_u64)),
        (4, None, Some(9)),
    ];
    for (id, section_id, subtopic_id) in questions {
        repo.upsert_question(&QuestionRecord {
            id,
            subtopic_id,
            section_id,
            position: 0,
            kind: kind.clone(),
            prompt: format!("Is {id} odd?"),
            media: None,
            marks: 2,
            key: Some(AnswerKey::McqSingle {
                option: OptionId::new(if id % 2 == 1 { 1 } else { 2 }),
            }),
            explanation: None,
        })
        .await
        .unwrap();
    }
    repo
}

#[tokio::test]
async fn exam_on_sqlite_is_graded_by_the_store() {
    let repo = seeded("services_sqlite_exam").await;
    let services = AppServices::from_storage(
        &Storage::from_sqlite(repo),
        Clock::fixed(fixed_now()),
        EngineSettings::default(),
    );

    let mut session = services
        .launcher()
        .start_session(&SessionConfig::exam(UserId::new(3), 1))
        .await
        .unwrap();
    assert!(session.snapshot().questions.iter().all(|q| q.checked.is_none()));

    session
        .select_option(QuestionId::new(1), OptionId::new(1))
        .unwrap();
    assert_eq!(
        session.finish_section(SectionId::new(1)).await.unwrap(),
        SectionAdvance::Next(SectionId::new(2))
    );
    session
        .select_option(QuestionId::new(2), OptionId::new(1))
        .unwrap();
    session.clock_mut().advance_secs(40);
    assert_eq!(
        session.finish_section(SectionId::new(2)).await.unwrap(),
        SectionAdvance::Exhausted
    );

    assert_eq!(session.status(), SessionStatus::Completed);
    let results = session.results().unwrap();
    assert_eq!(results.reason, FinalizeReason::Auto);
    assert_eq!(results.tally.correct(), 1);
    assert_eq!(results.tally.wrong(), 1);
    assert_eq!(results.tally.pending(), 0);
    assert_eq!(results.score, Some(2));
    assert_eq!(results.elapsed_seconds, 40);
}

#[tokio::test]
async fn practice_on_sqlite_logs_first_checks() {
    let repo = seeded("services_sqlite_practice").await;
    let services = AppServices::from_storage(
        &Storage::from_sqlite(repo.clone()),
        Clock::fixed(fixed_now()),
        EngineSettings::default(),
    );

    let mut session = services
        .launcher()
        .start_session(&SessionConfig::practice(UserId::new(3), 9))
        .await
        .unwrap();
    assert_eq!(session.attempt().question_count(), 2);

    let first = session.attempt().current_question().unwrap().id();
    session.select_option(first, OptionId::new(1)).unwrap();
    let outcome = session.check(first).await.unwrap();
    assert!(outcome.correct.is_some());
    assert!(outcome.key.is_some());

    assert_eq!(repo.attempt_count(session.attempt().session_id()).await.unwrap(), 1);

    session.request_finalize(FinalizeReason::Manual).await.unwrap();
    let tally = session.results().unwrap().tally;
    assert_eq!(tally.total(), 2);
    assert_eq!(tally.skipped(), 1);
}
