use crate::actor::Role;
use crate::error::CoreError;
use crate::ipc::helpers::{parse_actor, parse_params, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, NamedInput, SchoolInput, StudentInput};
use serde_json::Value;

fn handle_schools_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let input: SchoolInput = parse_params(params, Some("school"))?;
        // School admins may only touch their own school's branding.
        match input.id.as_deref() {
            Some(id) if actor.role == Role::SchoolAdmin => actor.require_admin_of(id)?,
            _ if actor.role == Role::SuperAdmin => {}
            _ => {
                return Err(CoreError::Forbidden(
                    "only super administrators may create schools".to_string(),
                )
                .into())
            }
        }
        let school = records::upsert_school(conn, input)?;
        to_json(&school)
    })
}

fn handle_classes_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let input: NamedInput = parse_params(params, Some("class"))?;
        actor.require_admin_of(&input.school_id)?;
        records::require_school(conn, &input.school_id)?;
        let class = records::upsert_class(conn, input)?;
        to_json(&class)
    })
}

fn handle_subjects_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let input: NamedInput = parse_params(params, Some("subject"))?;
        actor.require_admin_of(&input.school_id)?;
        records::require_school(conn, &input.school_id)?;
        let subject = records::upsert_subject(conn, input)?;
        to_json(&subject)
    })
}

fn handle_students_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, |conn, params| {
        let actor = parse_actor(params)?;
        let input: StudentInput = parse_params(params, Some("student"))?;
        actor.require_admin_of(&input.school_id)?;
        let class = records::require_class(conn, &input.class_id)?;
        if class.school_id != input.school_id {
            return Err(CoreError::validation("class belongs to a different school").into());
        }
        let student = records::upsert_student(conn, input)?;
        to_json(&student)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "schools.upsert" => Some(handle_schools_upsert(state, req)),
        "classes.upsert" => Some(handle_classes_upsert(state, req)),
        "subjects.upsert" => Some(handle_subjects_upsert(state, req)),
        "students.upsert" => Some(handle_students_upsert(state, req)),
        _ => None,
    }
}
