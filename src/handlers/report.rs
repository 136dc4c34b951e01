use crate::models::NutritionEstimate;

/// Text card for one analysis plus the day's running total.
pub fn format_summary(estimate: &NutritionEstimate, daily_calories: f64, calorie_goal: f64) -> String {
    let calorie_bar = create_progress_bar(daily_calories, calorie_goal);

    let mut summary = format!(
        "🍽️ *{}* (Güven: %{:.0})\n\
         🔥 {:.0} kcal | 🥩 {:.0}g protein | 🍞 {:.0}g karbonhidrat | 🧈 {:.0}g yağ\n\n\
         📊 Bugün\n\
         {}\n\
         {:.0}/{:.0} kcal ({}%)",
        estimate.detected_food,
        estimate.confidence,
        estimate.calories,
        estimate.protein,
        estimate.carbs,
        estimate.fat,
        calorie_bar.bar,
        daily_calories,
        calorie_goal,
        calorie_bar.percentage,
    );

    if !estimate.advice.is_empty() {
        summary.push_str(&format!("\n\n💡 {}", estimate.advice));
    }

    summary
}

/// Text shown when an analysis fails. The daily total is unchanged.
pub fn format_error(message: &str, daily_calories: f64) -> String {
    format!(
        "❌ Analiz yapılamadı.\n{}\n\n📊 Bugün: {:.0} kcal",
        message, daily_calories
    )
}

struct ProgressBar {
    bar: String,
    percentage: i32,
}

fn create_progress_bar(current: f64, goal: f64) -> ProgressBar {
    let percentage = if goal > 0.0 {
        ((current / goal) * 100.0).clamp(0.0, 100.0) as i32
    } else {
        0
    };
    let filled = (percentage / 10) as usize; // 10 basamak
    let empty = 10 - filled;

    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(empty));

    ProgressBar { bar, percentage }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        let bar = create_progress_bar(1000.0, 2000.0);
        assert_eq!(bar.percentage, 50);
        assert_eq!(bar.bar, "█████░░░░░");

        let over = create_progress_bar(5000.0, 2000.0);
        assert_eq!(over.percentage, 100);
        assert_eq!(over.bar, "██████████");

        let no_goal = create_progress_bar(500.0, 0.0);
        assert_eq!(no_goal.percentage, 0);
    }

    #[test]
    fn test_format_summary() {
        let estimate = NutritionEstimate {
            detected_food: "menemen".to_string(),
            confidence: 90.0,
            calories: 320.0,
            protein: 14.0,
            carbs: 18.0,
            fat: 22.0,
            advice: "High in protein.".to_string(),
        };

        let summary = format_summary(&estimate, 1567.0, 2000.0);

        assert!(summary.contains("*menemen*"));
        assert!(summary.contains("Güven: %90"));
        assert!(summary.contains("320 kcal"));
        assert!(summary.contains("1567/2000 kcal (78%)"));
        assert!(summary.ends_with("💡 High in protein."));
    }

    #[test]
    fn test_format_summary_without_advice() {
        let estimate = NutritionEstimate {
            detected_food: "salad".to_string(),
            calories: 150.0,
            ..NutritionEstimate::default()
        };

        assert!(!format_summary(&estimate, 150.0, 2000.0).contains("💡"));
    }

    #[test]
    fn test_format_error() {
        let text = format_error("Claude API Error: 401 - unauthorized", 1200.0);

        assert!(text.contains("Claude API Error: 401"));
        assert!(text.contains("1200 kcal"));
    }
}
