use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub id_number: Option<String>,
}

impl GroupMember {
    /// Name shown above a member's rating sub-table.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// External student id when one is recorded, otherwise the member id.
    pub fn student_id(&self) -> &str {
        match self.id_number.as_deref() {
            Some(v) if !v.trim().is_empty() => v,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub evaluation_id: String,
    pub name: String,
    pub team_number: Option<String>,
}

impl Group {
    pub fn team_label(&self) -> &str {
        match self.team_number.as_deref() {
            Some(v) if !v.trim().is_empty() => v,
            _ => &self.id,
        }
    }
}

/// Orders questions by sort position, ties broken by id.
pub fn sort_questions(questions: &mut [Question]) {
    questions.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));
}

/// Roster order: surname, given name, then id.
pub fn sort_members(members: &mut [GroupMember]) {
    members.sort_by(|a, b| {
        a.last_name
            .cmp(&b.last_name)
            .then_with(|| a.first_name.cmp(&b.first_name))
            .then_with(|| a.id.cmp(&b.id))
    });
}
