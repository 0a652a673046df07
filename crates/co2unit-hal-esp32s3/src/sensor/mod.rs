pub mod explorir;
