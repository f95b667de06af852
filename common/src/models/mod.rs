//! Shared data models.

pub mod todo;

// Re-export commonly used types
pub use todo::{
    parse_todo_id, CreateTodoRequest, ImportTodo, ImportTodosRequest, ListTodosQuery, Todo,
    TodoRow,
};
