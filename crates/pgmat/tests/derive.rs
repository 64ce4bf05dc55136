//! `#[derive(FromRow)]` / `#[derive(ToParams)]` without a database.

#![allow(dead_code)]

use pgmat::{
    Command, DataTable, FromRow, ParamSource, ParamValue, ParameterBinder, ToParams, Value,
};

#[derive(Debug, PartialEq, FromRow)]
struct User {
    id: i64,
    username: String,
    #[orm(column = "email_address")]
    email: Option<String>,
    #[orm(default)]
    nickname: Option<String>,
    #[orm(skip)]
    cached: u32,
}

#[derive(FromRow)]
#[orm(rename_all = "UPPERCASE")]
struct Shouting {
    id: i64,
}

#[derive(ToParams)]
struct Filter {
    status: String,
    ids: Vec<i64>,
    #[orm(rename = "min")]
    min_age: i32,
    avatar: Vec<u8>,
    #[orm(skip)]
    page: u32,
}

#[derive(ToParams)]
#[orm(rename_all = "camelCase")]
struct CamelParams {
    user_id: i64,
    created_by: Option<String>,
}

fn users() -> DataTable {
    DataTable::new(["id", "username", "email_address"])
        .with_row(vec![Value::I64(1), Value::Text("ann".into()), Value::Null])
        .unwrap()
}

#[test]
fn from_row_maps_by_column_name() {
    let users: Vec<User> = users().map_rows().unwrap();
    assert_eq!(
        users,
        vec![User {
            id: 1,
            username: "ann".into(),
            email: None,
            nickname: None,
            cached: 0,
        }]
    );
}

#[test]
fn from_row_reports_missing_columns() {
    let table = DataTable::new(["id"]).with_row(vec![Value::I64(1)]).unwrap();
    let err = User::from_row(table.first().unwrap()).unwrap_err();
    assert!(err.to_string().contains("username"));
}

#[test]
fn from_row_rename_all() {
    let table = DataTable::new(["ID"]).with_row(vec![Value::I64(9)]).unwrap();
    let row = Shouting::from_row(table.first().unwrap()).unwrap();
    assert_eq!(row.id, 9);
}

#[test]
fn to_params_keeps_declaration_order() {
    let filter = Filter {
        status: "active".into(),
        ids: vec![1, 2],
        min_age: 18,
        avatar: vec![0xde, 0xad],
        page: 3,
    };
    let params = filter.to_params();
    let names: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["status", "ids", "min", "avatar"]);
    assert_eq!(params[1].1, ParamValue::List(vec![Value::I64(1), Value::I64(2)]));
    assert_eq!(params[3].1, ParamValue::Scalar(Value::Bytes(vec![0xde, 0xad])));
}

#[test]
fn to_params_rename_all() {
    let params = CamelParams {
        user_id: 1,
        created_by: None,
    }
    .to_params();
    assert_eq!(params[0].0, "userId");
    assert_eq!(params[1].0, "createdBy");
    assert_eq!(params[1].1, ParamValue::Scalar(Value::Null));
}

#[test]
fn derived_source_binds_and_expands() {
    let filter = Filter {
        status: "active".into(),
        ids: vec![10, 20],
        min_age: 21,
        avatar: Vec::new(),
        page: 0,
    };
    let mut cmd = Command::new(
        "SELECT * FROM users WHERE status = @status AND id IN (@ids) AND age >= @min",
    );
    ParameterBinder::default().bind_source(&mut cmd, ParamSource::from(&filter));

    assert_eq!(
        cmd.text(),
        "SELECT * FROM users WHERE status = @status AND id IN (@ids_0, @ids_1) AND age >= @min"
    );
    assert_eq!(
        cmd.parameters().names(),
        vec!["@status", "@ids_0", "@ids_1", "@min", "@avatar"]
    );
}
