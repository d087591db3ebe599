use crate::{EntityProfile, SearchPreferences};

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn joined(values: &[String]) -> Option<String> {
    let parts: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Descriptive text block fed to the encoder: category, location,
/// specialties, certifications and description, plus the requester's stated
/// preferences when given. The name is not part of the block.
pub fn profile_text(profile: &EntityProfile, preferences: Option<&SearchPreferences>) -> String {
    let mut lines = vec![format!("category: {}", profile.category.as_str())];

    let location: Vec<&str> = [non_blank(&profile.city), non_blank(&profile.state)]
        .into_iter()
        .flatten()
        .collect();
    if !location.is_empty() {
        lines.push(format!("location: {}", location.join(", ")));
    }
    if let Some(specialties) = joined(&profile.specialties) {
        lines.push(format!("specialties: {specialties}"));
    }
    if let Some(certifications) = joined(&profile.certifications) {
        lines.push(format!("certifications: {certifications}"));
    }
    if let Some(description) = non_blank(&profile.description) {
        lines.push(format!("description: {description}"));
    }

    if let Some(prefs) = preferences {
        if let Some(expertise) = joined(&prefs.expertise) {
            lines.push(format!("seeking expertise: {expertise}"));
        }
        let preferred_location: Vec<&str> = [non_blank(&prefs.city), non_blank(&prefs.state)]
            .into_iter()
            .flatten()
            .collect();
        if !preferred_location.is_empty() {
            lines.push(format!("preferred location: {}", preferred_location.join(", ")));
        }
        if !prefs.categories.is_empty() {
            let categories: Vec<&str> = prefs.categories.iter().map(|c| c.as_str()).collect();
            lines.push(format!("seeking partners: {}", categories.join(", ")));
        }
        if let Some(size) = prefs.preferred_size {
            lines.push(format!("preferred size: {}", size.as_ref()));
        }
        if let Some(notes) = non_blank(&prefs.notes) {
            lines.push(format!("notes: {notes}"));
        }
    }

    lines.join("\n")
}
