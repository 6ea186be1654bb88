use chrono::{Datelike, Days, Months, NaiveDate, Weekday};

use crate::datetime::{format_canonical_date, parse_canonical_date};
use crate::error::{StoreError, StoreResult};
use crate::task::Task;

pub const GRID_CELLS: usize = 42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub date: NaiveDate,
    pub in_month: bool,
    pub is_today: bool,
    pub tasks: Vec<Task>,
}

/// Six Sunday-first weeks covering one month, padded with the neighbouring
/// months' days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub cells: Vec<DayCell>,
}

impl MonthGrid {
    #[tracing::instrument(skip(tasks), fields(task_count = tasks.len()))]
    pub fn build(year: i32, month: u32, tasks: &[Task], today: NaiveDate) -> StoreResult<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| StoreError::validation(format!("invalid month {year}-{month:02}")))?;

        let lead = u64::from(first.weekday().num_days_from_sunday());
        let start = first
            .checked_sub_days(Days::new(lead))
            .ok_or_else(|| StoreError::validation("calendar range out of bounds"))?;

        let cells = start
            .iter_days()
            .take(GRID_CELLS)
            .map(|date| DayCell {
                date,
                in_month: date.month() == month && date.year() == year,
                is_today: date == today,
                tasks: tasks_due_on(tasks, date),
            })
            .collect();

        Ok(Self { year, month, cells })
    }

    pub fn weeks(&self) -> impl Iterator<Item = &[DayCell]> {
        self.cells.chunks(7)
    }

    #[must_use]
    pub fn first_of_month(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    #[must_use]
    pub fn title(&self) -> String {
        self.first_of_month()
            .map(|date| date.format("%B %Y").to_string())
            .unwrap_or_default()
    }
}

/// Tasks whose due date is `date`, in collection order.
#[must_use]
pub fn tasks_due_on(tasks: &[Task], date: NaiveDate) -> Vec<Task> {
    let key = format_canonical_date(date);
    tasks
        .iter()
        .filter(|task| {
            task.due_date
                .as_deref()
                .is_some_and(|due| due == key || parse_canonical_date(due) == Some(date))
        })
        .cloned()
        .collect()
}

#[must_use]
pub fn prev_month(year: i32, month: u32) -> (i32, u32) {
    shift_month(year, month, -1)
}

#[must_use]
pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    shift_month(year, month, 1)
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let Some(first) = NaiveDate::from_ymd_opt(year, month.clamp(1, 12), 1) else {
        return (year, month);
    };
    let shifted = if delta < 0 {
        first.checked_sub_months(Months::new(delta.unsigned_abs()))
    } else {
        first.checked_add_months(Months::new(delta.unsigned_abs()))
    };
    shifted.map_or((year, month), |date| (date.year(), date.month()))
}

#[must_use]
pub fn weekday_labels() -> [&'static str; 7] {
    let mut labels = [""; 7];
    let mut day = Weekday::Sun;
    for label in &mut labels {
        *label = match day {
            Weekday::Sun => "SUN",
            Weekday::Mon => "MON",
            Weekday::Tue => "TUE",
            Weekday::Wed => "WED",
            Weekday::Thu => "THU",
            Weekday::Fri => "FRI",
            Weekday::Sat => "SAT",
        };
        day = day.succ();
    }
    labels
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate, TimeZone, Utc, Weekday};

    use super::{GRID_CELLS, MonthGrid, next_month, prev_month, tasks_due_on, weekday_labels};
    use crate::task::{Priority, Task, TaskId};

    fn due(id: &str, date: &str) -> Task {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Task {
            id: TaskId::new(id),
            title: id.to_string(),
            due_date: Some(date.to_string()),
            priority: Priority::Medium,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn grid_covers_six_weeks_from_sunday() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        let grid = MonthGrid::build(2024, 3, &[], today).unwrap();

        assert_eq!(grid.cells.len(), GRID_CELLS);
        assert_eq!(grid.cells[0].date.weekday(), Weekday::Sun);
        // March 2024 starts on a Friday: five leading February days.
        assert_eq!(grid.cells[0].date, NaiveDate::from_ymd_opt(2024, 2, 25).unwrap());
        assert!(!grid.cells[4].in_month);
        assert!(grid.cells[5].in_month);
        assert_eq!(grid.cells.iter().filter(|cell| cell.in_month).count(), 31);
        assert_eq!(grid.cells.iter().filter(|cell| cell.is_today).count(), 1);
        assert_eq!(grid.weeks().count(), 6);
        assert_eq!(grid.title(), "March 2024");
    }

    #[test]
    fn tasks_land_on_their_due_dates_including_padding() {
        let tasks = vec![
            due("proposal", "2024-03-20"),
            due("review", "2024-03-20"),
            due("spillover", "2024-04-02"),
            due("elsewhere", "2025-01-01"),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let grid = MonthGrid::build(2024, 3, &tasks, today).unwrap();

        let cell = grid
            .cells
            .iter()
            .find(|cell| cell.date == NaiveDate::from_ymd_opt(2024, 3, 20).unwrap())
            .unwrap();
        let titles: Vec<_> = cell.tasks.iter().map(|task| task.title.as_str()).collect();
        assert_eq!(titles, vec!["proposal", "review"]);

        let april = grid
            .cells
            .iter()
            .find(|cell| cell.date == NaiveDate::from_ymd_opt(2024, 4, 2).unwrap())
            .unwrap();
        assert!(!april.in_month);
        assert_eq!(april.tasks.len(), 1);

        let placed: usize = grid.cells.iter().map(|cell| cell.tasks.len()).sum();
        assert_eq!(placed, 3);
    }

    #[test]
    fn rejects_invalid_months() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(MonthGrid::build(2024, 13, &[], today).unwrap_err().is_validation());
    }

    #[test]
    fn month_navigation_wraps_years() {
        assert_eq!(prev_month(2024, 1), (2023, 12));
        assert_eq!(next_month(2024, 12), (2025, 1));
        assert_eq!(next_month(2024, 3), (2024, 4));
    }

    #[test]
    fn due_lookup_ignores_tasks_without_dates() {
        let mut undated = due("undated", "2024-03-20");
        undated.due_date = None;
        let date = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        assert!(tasks_due_on(&[undated], date).is_empty());
    }

    #[test]
    fn labels_start_on_sunday() {
        assert_eq!(weekday_labels()[0], "SUN");
        assert_eq!(weekday_labels()[6], "SAT");
    }
}
