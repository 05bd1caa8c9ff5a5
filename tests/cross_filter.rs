use std::sync::Arc;

use floodmap::{
    ClientConfig, Combinator, Condition, ConditionGroup, DimensionOptions, FilterController,
    FilterDimension, FilterValue, InMemoryTable, Operator, Row,
};
use serde_json::{Value, json};

fn row(id: i64, year: &str, location: &str, cause: &str, event: &str, deaths: &str) -> Row {
    match json!({
        "id": id,
        "year": year,
        "location_name": location,
        "cause_of_flood": cause,
        "flood_event_name": event,
        "deaths_toll": deaths,
        "latitude": 38.0,
        "longitude": 23.0,
    }) {
        Value::Object(map) => map,
        _ => panic!("fixture must be an object"),
    }
}

fn controller() -> (Arc<InMemoryTable>, FilterController) {
    let table = Arc::new(InMemoryTable::new(
        "memory",
        "floods",
        vec![
            row(1, "2023", "Volos", "Storm", "Daniel", "17"),
            row(2, "2023", "Larissa", "Storm", "Daniel", "4"),
            row(3, "2017", "Mandra", "Flash flood", "Mandra flood", "24"),
            row(4, "1994", "Athens", "Rainfall", "", "3"),
            row(5, "2017", "Athens", "Rainfall", "November 2017", "0"),
        ],
    ));
    let config = ClientConfig::new("https://abcd.supabase.co", "key");
    let controller = FilterController::new(table.clone(), config);
    (table, controller)
}

fn texts(values: &[&str]) -> Vec<FilterValue> {
    values.iter().copied().map(FilterValue::from).collect()
}

fn numbers(values: &[f64]) -> Vec<FilterValue> {
    values.iter().copied().map(FilterValue::Number).collect()
}

#[test]
fn unfiltered_options_are_complete_and_ordered_per_dimension() {
    let (_, controller) = controller();
    let outcome = controller.refresh_options();
    let options = outcome.options().unwrap();
    assert!(options.is_complete());
    assert_eq!(
        options.values(FilterDimension::Year),
        numbers(&[2023.0, 2017.0, 1994.0])
    );
    assert_eq!(
        options.values(FilterDimension::Location),
        texts(&["Athens", "Larissa", "Mandra", "Volos"])
    );
    assert_eq!(
        options.values(FilterDimension::EventName),
        texts(&["Daniel", "Mandra flood", "November 2017"])
    );
    assert_eq!(
        options.values(FilterDimension::DeathToll),
        numbers(&[0.0, 3.0, 4.0, 17.0, 24.0])
    );
}

#[test]
fn selected_dimension_keeps_its_own_alternatives() {
    let (_, controller) = controller();
    let outcome = controller.select(FilterDimension::Year, FilterValue::Number(2017.0));
    let options = outcome.options().unwrap();
    assert_eq!(
        options.values(FilterDimension::Year),
        numbers(&[2023.0, 2017.0, 1994.0])
    );
    assert_eq!(
        options.values(FilterDimension::Location),
        texts(&["Athens", "Mandra"])
    );
    assert_eq!(
        options.values(FilterDimension::Cause),
        texts(&["Flash flood", "Rainfall"])
    );
    assert_eq!(options.values(FilterDimension::DeathToll), numbers(&[0.0, 24.0]));
}

#[test]
fn each_dimension_is_narrowed_by_the_other_selections_only() {
    let (_, controller) = controller();
    controller.select(FilterDimension::Year, FilterValue::Number(2017.0));
    let outcome = controller.select(FilterDimension::Location, FilterValue::from("Athens"));
    let options = outcome.options().unwrap();
    assert_eq!(options.values(FilterDimension::Year), numbers(&[2017.0, 1994.0]));
    assert_eq!(
        options.values(FilterDimension::Location),
        texts(&["Athens", "Mandra"])
    );
    assert_eq!(options.values(FilterDimension::Cause), texts(&["Rainfall"]));

    let outcome = controller.clear(FilterDimension::Year);
    let options = outcome.options().unwrap();
    assert_eq!(options.values(FilterDimension::Year), numbers(&[2017.0, 1994.0]));
    assert_eq!(
        options.values(FilterDimension::Location),
        texts(&["Athens", "Larissa", "Mandra", "Volos"])
    );
}

#[test]
fn selection_with_no_matches_empties_the_other_controls() {
    let (_, controller) = controller();
    controller.select(FilterDimension::Year, FilterValue::Number(2023.0));
    let outcome = controller.select(FilterDimension::Cause, FilterValue::from("Rainfall"));
    let options = outcome.options().unwrap();
    assert_eq!(
        options.get(FilterDimension::Location),
        Some(&DimensionOptions::Ready(Vec::new()))
    );
    assert_eq!(options.values(FilterDimension::Year), numbers(&[2017.0, 1994.0]));
}

#[test]
fn records_follow_the_selection_and_conditions() {
    let (_, controller) = controller();
    controller.select(FilterDimension::Location, FilterValue::from("Athens"));
    let ids: Vec<i64> = controller
        .load_records(None)
        .unwrap()
        .iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(ids, vec![4, 5]);
    assert_eq!(controller.record_count(None).unwrap(), 2);

    let group = ConditionGroup::new(Combinator::And).with(Condition::new(
        "flood_event_name",
        Operator::Contains,
        "november",
    ));
    let records = controller.load_records(Some(&group)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 5);
    assert_eq!(controller.record_count(Some(&group)).unwrap(), 1);
}

#[test]
fn failed_dimension_is_reported_without_hiding_the_others() {
    let (table, controller) = controller();
    table.fail_on_fetch(1);
    let outcome = controller.refresh_options();
    let options = outcome.options().unwrap();
    assert!(!options.is_complete());
    let unavailable = FilterDimension::ALL
        .into_iter()
        .filter(|dim| !options.is_available(*dim))
        .count();
    assert_eq!(unavailable, 1);
    assert_eq!(controller.notices().len(), 1);

    let outcome = controller.refresh_options();
    assert!(outcome.options().unwrap().is_complete());
}
